use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type StrataResult<T> = Result<T, StrataError>;

/// A chunk placement that cannot be served because its account is not connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingPlacement {
    pub index: u32,
    pub account_id: String,
}

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("vault is locked")]
    VaultLocked,

    #[error("vault has not been initialized")]
    VaultNotInitialized,

    #[error("vault already exists: {vault_id}")]
    VaultAlreadyExists { vault_id: String },

    #[error("invalid password")]
    InvalidPassword,

    #[error(
        "insufficient storage for chunk {chunk_index}: needs {required} bytes, best account has {best_free} free"
    )]
    InsufficientStorage {
        chunk_index: u32,
        required: u64,
        best_free: u64,
    },

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("chunk {index} is missing")]
    MissingChunk { index: u32 },

    #[error("file {file_id} is partially unavailable: {} chunk(s) on disconnected accounts", missing.len())]
    PartialFileUnavailable {
        file_id: String,
        missing: Vec<MissingPlacement>,
    },

    #[error("transient backend failure on {account_id}: {message}")]
    NetworkTransient { account_id: String, message: String },

    #[error("backend error on {account_id}: {message}")]
    Backend { account_id: String, message: String },

    #[error("object {remote_object_id} not found on {account_id}")]
    ObjectNotFound {
        account_id: String,
        remote_object_id: String,
    },

    #[error("registry conflict: {0}")]
    RegistryConflict(String),

    #[error("upload of {file_id} was cancelled")]
    UploadCancelled { file_id: String },

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("account not connected: {0}")]
    AccountNotFound(String),

    #[error("incompatible backup: {}", .0.join("; "))]
    IncompatibleBackup(Vec<String>),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StrataError {
    /// Whether a failed backend call may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, StrataError::NetworkTransient { .. })
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        StrataError::Integrity(msg.into())
    }

    pub fn backend(account_id: &str, msg: impl std::fmt::Display) -> Self {
        StrataError::Backend {
            account_id: account_id.to_string(),
            message: msg.to_string(),
        }
    }

    pub fn transient(account_id: &str, msg: impl std::fmt::Display) -> Self {
        StrataError::NetworkTransient {
            account_id: account_id.to_string(),
            message: msg.to_string(),
        }
    }
}
