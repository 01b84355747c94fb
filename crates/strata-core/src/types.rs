use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Argon2id cost parameters, persisted with the vault so it stays openable
/// when the configured defaults change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Lifecycle state of a vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultState {
    Uninitialized,
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultStatus {
    pub state: VaultState,
    pub unlocked: bool,
    pub vault_id: Option<String>,
}

/// Returned by vault initialization; the salt is needed to unlock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitSummary {
    pub vault_id: String,
    /// base64 salt
    pub salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockSummary {
    pub accounts_loaded: usize,
    pub files_loaded: usize,
}

/// Live identity and capacity of a connected storage account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: String,
    /// Stable identifier that survives re-authentication (e.g. an email)
    pub identity: String,
    pub capacity_total: u64,
    pub capacity_used: u64,
}

impl AccountSnapshot {
    pub fn free(&self) -> u64 {
        self.capacity_total.saturating_sub(self.capacity_used)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityReport {
    pub used: u64,
    pub total: u64,
}

/// Placement of one encrypted chunk on one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub index: u32,
    pub account_id: String,
    /// Identity of the account at upload time; the key used for remapping
    #[serde(default)]
    pub account_identity: String,
    /// Opaque handle returned by the backend on upload
    pub remote_object_id: String,
    /// Size of the stored object (header + nonce + ciphertext + tag)
    pub encrypted_size: u64,
    /// BLAKE3 of the plaintext chunk (hex)
    pub content_fingerprint: String,
}

/// A logical file and its ordered chunk placements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub file_id: String,
    pub name: String,
    pub size: u64,
    /// Unix timestamp (seconds)
    pub created_at: u64,
    pub chunk_count: u32,
    pub chunks: Vec<ChunkRecord>,
    /// true if rebuilt from a backend scan rather than an upload
    #[serde(default)]
    pub discovered: bool,
    /// Caller-supplied metadata. Lives only in the registry: chunk headers
    /// do not carry it, so entries rebuilt by discovery start with an empty map.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl FileEntry {
    /// `chunks` holds exactly indices `0..chunk_count`, in order.
    pub fn is_consistent(&self) -> bool {
        self.chunk_count > 0
            && self.chunks.len() == self.chunk_count as usize
            && self
                .chunks
                .iter()
                .enumerate()
                .all(|(i, c)| c.index as usize == i)
    }

    /// Distinct account ids referenced by this file's chunks
    pub fn account_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.chunks.iter().map(|c| c.account_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn encrypted_size(&self) -> u64 {
        self.chunks.iter().map(|c| c.encrypted_size).sum()
    }
}

/// A chunk that could not be deleted from its backend within the retry budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedChunk {
    pub file_id: String,
    pub record: ChunkRecord,
    pub reason: String,
    pub orphaned_at: u64,
}

/// Registry view of a file together with its current reachability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStatus {
    pub entry: FileEntry,
    pub accessible: bool,
    pub missing_accounts: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteReport {
    pub deleted_chunks: usize,
    pub orphaned_chunks: usize,
}

/// Non-secret snapshot sufficient to validate a password and resume a vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupDescriptor {
    pub format_version: u32,
    pub vault_id: String,
    /// base64 salt
    pub salt: String,
    pub kdf_params: KdfParams,
    /// hex verifier
    pub verifier: String,
    /// When the vault was first created; 0 in descriptors that predate the field
    #[serde(default)]
    pub created_at: u64,
    pub exported_at: u64,
}

/// A raw object as listed by a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub remote_object_id: String,
    pub name: String,
    pub size: u64,
    /// Unix timestamp (seconds), when the backend reports one
    pub created_time: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSortBy {
    #[default]
    Name,
    Size,
    Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkQuery {
    pub sort_by: ChunkSortBy,
    pub order: SortOrder,
    pub limit: Option<usize>,
    /// Case-insensitive match against object name or original file name
    pub search: Option<String>,
}

/// A raw object on an account, annotated from the registry when known
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteChunkInfo {
    pub remote_object_id: String,
    pub name: String,
    pub size: u64,
    pub created_time: Option<u64>,
    pub file_id: Option<String>,
    pub file_name: Option<String>,
    pub chunk_index: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountStats {
    pub account_id: String,
    pub identity: String,
    pub capacity_total: u64,
    pub capacity_used: u64,
    pub object_count: usize,
    pub stored_bytes: u64,
    /// Objects referenced by the registry
    pub registered_chunks: usize,
    /// Registry files with at least one chunk on this account
    pub files_touching: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InaccessibleFile {
    pub file_id: String,
    pub name: String,
    pub missing_accounts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessibilityReport {
    pub total_files: usize,
    pub accessible_files: usize,
    pub missing_accounts: Vec<String>,
    pub inaccessible_files: Vec<InaccessibleFile>,
    pub accessibility_percentage: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemapReport {
    pub remapped_chunks: usize,
    /// Missing account ids that no connected account could be matched to
    pub unresolved_accounts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorationSummary {
    pub vault_id: String,
    pub files_restored: usize,
    pub chunks_restored: usize,
    /// true when no registry backup was supplied and discovery must rebuild it
    pub requires_discovery: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub compatible: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub newly_discovered: usize,
    /// Groups still waiting for missing chunks
    pub pending_groups: usize,
    pub scanned_objects: usize,
    /// Objects that were not ours or whose header failed to open
    pub skipped_objects: usize,
    pub failed_accounts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultBackupInfo {
    pub path: String,
    pub descriptor: BackupDescriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryBackupInfo {
    pub path: String,
    pub vault_id: String,
    pub size: u64,
    pub modified: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectedBackups {
    pub vault_backups: Vec<VaultBackupInfo>,
    pub registry_backups: Vec<RegistryBackupInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSummary {
    pub accounts: Vec<AccountSnapshot>,
    pub total_capacity: u64,
    pub total_used: u64,
    pub total_free: u64,
    pub file_count: usize,
    pub chunk_count: usize,
    pub stored_bytes: u64,
}
