//! strata-storage: storage accounts behind one capability interface
//!
//! The engine never knows which provider holds a chunk; it only sees
//! [`ChunkBackend`]. [`OpendalBackend`] adapts any OpenDAL service.

pub mod backend;
pub mod health;
pub mod opendal_backend;
pub mod operator;
pub mod retry;

pub use backend::{ChunkBackend, SharedBackend};
pub use health::{check_health, AccountHealth};
pub use opendal_backend::OpendalBackend;
pub use operator::{build_fs_operator, build_memory_operator};
pub use retry::RetryPolicy;

/// Prefix under which every chunk object is stored
pub const OBJECT_PREFIX: &str = "strata/";
