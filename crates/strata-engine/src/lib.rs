//! strata-engine: vault lifecycle, file registry, placement, and transfers
//!
//! # Overview
//! - `vault`: create/unlock/lock state machine and sessions
//! - `registry`: the file → chunk placement map, persisted sealed
//! - `planner`: least-loaded-first chunk placement
//! - `transfer`: concurrent upload/download/delete with rollback
//! - `discovery`: rebuild registry entries from chunk headers
//! - `restore`: backups, restore, account remediation
//! - `drive`: raw per-account introspection
//! - `service`: [`VaultService`], the entry point for callers

pub mod accounts;
pub mod discovery;
pub mod drive;
pub mod events;
pub mod planner;
pub mod registry;
pub mod restore;
pub mod service;
pub mod store;
pub mod transfer;
pub mod vault;

pub use accounts::AccountPool;
pub use events::{EventBus, VaultEvent};
pub use planner::{plan, Placement};
pub use registry::FileRegistry;
pub use service::VaultService;
pub use store::{VaultHeader, VaultStore};
pub use transfer::TransferSettings;
pub use vault::{Session, VaultManager};

/// Seconds since the Unix epoch
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
