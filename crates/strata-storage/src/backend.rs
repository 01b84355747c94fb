//! The capability interface every storage account adapter implements

use async_trait::async_trait;
use std::sync::Arc;
use strata_core::types::{AccountSnapshot, CapacityReport, RemoteObject};
use strata_core::StrataResult;

/// One authenticated storage account.
///
/// Implementations map provider failures onto `StrataError`: transient
/// conditions as `NetworkTransient`, missing objects as `ObjectNotFound`,
/// everything else as `Backend`.
#[async_trait]
pub trait ChunkBackend: Send + Sync {
    /// Identifier of this account in the current session
    fn account_id(&self) -> &str;

    /// Stable identifier that survives re-authentication (e.g. an email)
    fn identity(&self) -> &str;

    /// Store `header ‖ body` under `name`; returns the remote object id.
    async fn upload(&self, name: &str, header: &[u8], body: &[u8]) -> StrataResult<String>;

    async fn download(&self, remote_object_id: &str) -> StrataResult<Vec<u8>>;

    /// The first `len` bytes of an object (fewer if the object is shorter).
    async fn read_header(&self, remote_object_id: &str, len: usize) -> StrataResult<Vec<u8>> {
        let mut data = self.download(remote_object_id).await?;
        data.truncate(len);
        Ok(data)
    }

    async fn delete(&self, remote_object_id: &str) -> StrataResult<()>;

    /// Raw objects stored under this system's naming convention
    async fn list(&self) -> StrataResult<Vec<RemoteObject>>;

    async fn capacity(&self) -> StrataResult<CapacityReport>;

    async fn snapshot(&self) -> StrataResult<AccountSnapshot> {
        let cap = self.capacity().await?;
        Ok(AccountSnapshot {
            account_id: self.account_id().to_string(),
            identity: self.identity().to_string(),
            capacity_total: cap.total,
            capacity_used: cap.used,
        })
    }
}

pub type SharedBackend = Arc<dyn ChunkBackend>;
