//! [`ChunkBackend`] over an OpenDAL [`Operator`] with a configured capacity

use async_trait::async_trait;
use futures::future::try_join_all;
use opendal::{ErrorKind, Operator};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use strata_core::types::{CapacityReport, RemoteObject};
use strata_core::{StrataError, StrataResult};
use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::ChunkBackend;
use crate::OBJECT_PREFIX;

pub struct OpendalBackend {
    op: Operator,
    account_id: String,
    identity: String,
    capacity_total: u64,
    /// Upload times of objects written through this handle; OpenDAL services
    /// do not report creation time uniformly.
    created: Mutex<HashMap<String, u64>>,
}

impl OpendalBackend {
    pub fn new(
        op: Operator,
        account_id: impl Into<String>,
        identity: impl Into<String>,
        capacity_total: u64,
    ) -> Self {
        Self {
            op,
            account_id: account_id.into(),
            identity: identity.into(),
            capacity_total,
            created: Mutex::new(HashMap::new()),
        }
    }

    fn map_err(&self, e: opendal::Error, remote_object_id: &str) -> StrataError {
        if e.kind() == ErrorKind::NotFound {
            StrataError::ObjectNotFound {
                account_id: self.account_id.clone(),
                remote_object_id: remote_object_id.to_string(),
            }
        } else if e.is_temporary() {
            StrataError::transient(&self.account_id, e)
        } else {
            StrataError::backend(&self.account_id, e)
        }
    }

    async fn object_size(&self, path: &str) -> StrataResult<u64> {
        let meta = self.op.stat(path).await.map_err(|e| self.map_err(e, path))?;
        Ok(meta.content_length())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[async_trait]
impl ChunkBackend for OpendalBackend {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    async fn upload(&self, name: &str, header: &[u8], body: &[u8]) -> StrataResult<String> {
        let mut object = Vec::with_capacity(header.len() + body.len());
        object.extend_from_slice(header);
        object.extend_from_slice(body);
        let size = object.len();

        self.op
            .write(name, object)
            .await
            .map_err(|e| self.map_err(e, name))?;
        self.created.lock().await.insert(name.to_string(), unix_now());

        debug!(account = %self.account_id, object = %name, bytes = size, "object stored");
        Ok(name.to_string())
    }

    async fn download(&self, remote_object_id: &str) -> StrataResult<Vec<u8>> {
        let buf = self
            .op
            .read(remote_object_id)
            .await
            .map_err(|e| self.map_err(e, remote_object_id))?;
        Ok(buf.to_vec())
    }

    async fn read_header(&self, remote_object_id: &str, len: usize) -> StrataResult<Vec<u8>> {
        let size = self.object_size(remote_object_id).await?;
        if size <= len as u64 {
            return self.download(remote_object_id).await;
        }
        let buf = self
            .op
            .read_with(remote_object_id)
            .range(0..len as u64)
            .await
            .map_err(|e| self.map_err(e, remote_object_id))?;
        Ok(buf.to_vec())
    }

    async fn delete(&self, remote_object_id: &str) -> StrataResult<()> {
        // OpenDAL deletes are idempotent; report a missing object explicitly
        if !self
            .op
            .exists(remote_object_id)
            .await
            .map_err(|e| self.map_err(e, remote_object_id))?
        {
            return Err(StrataError::ObjectNotFound {
                account_id: self.account_id.clone(),
                remote_object_id: remote_object_id.to_string(),
            });
        }
        self.op
            .delete(remote_object_id)
            .await
            .map_err(|e| self.map_err(e, remote_object_id))?;
        self.created.lock().await.remove(remote_object_id);
        debug!(account = %self.account_id, object = %remote_object_id, "object deleted");
        Ok(())
    }

    async fn list(&self) -> StrataResult<Vec<RemoteObject>> {
        let entries = match self.op.list_with(OBJECT_PREFIX).recursive(true).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.map_err(e, OBJECT_PREFIX)),
        };

        let paths: Vec<String> = entries
            .into_iter()
            .filter(|e| !e.metadata().mode().is_dir() && !e.path().ends_with('/'))
            .map(|e| e.path().to_string())
            .collect();

        let sizes = try_join_all(paths.iter().map(|p| self.object_size(p))).await?;
        let created = self.created.lock().await;

        let mut objects: Vec<RemoteObject> = paths
            .into_iter()
            .zip(sizes)
            .map(|(path, size)| {
                let name = path.rsplit('/').next().unwrap_or(&path).to_string();
                RemoteObject {
                    created_time: created.get(&path).copied(),
                    remote_object_id: path,
                    name,
                    size,
                }
            })
            .collect();
        objects.sort_by(|a, b| a.remote_object_id.cmp(&b.remote_object_id));
        Ok(objects)
    }

    async fn capacity(&self) -> StrataResult<CapacityReport> {
        let used = self.list().await?.iter().map(|o| o.size).sum();
        Ok(CapacityReport {
            used,
            total: self.capacity_total,
        })
    }
}
