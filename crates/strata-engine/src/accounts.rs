//! Connected storage accounts

use std::collections::BTreeMap;
use strata_core::types::AccountSnapshot;
use strata_storage::{RetryPolicy, SharedBackend};
use tokio::sync::RwLock;
use tracing::warn;

/// The set of backends authenticated in this session, keyed by account id.
#[derive(Default)]
pub struct AccountPool {
    accounts: RwLock<BTreeMap<String, SharedBackend>>,
}

impl AccountPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an account. Returns true if it was not connected before.
    pub async fn connect(&self, backend: SharedBackend) -> bool {
        let id = backend.account_id().to_string();
        self.accounts.write().await.insert(id, backend).is_none()
    }

    pub async fn disconnect(&self, account_id: &str) -> Option<SharedBackend> {
        self.accounts.write().await.remove(account_id)
    }

    pub async fn get(&self, account_id: &str) -> Option<SharedBackend> {
        self.accounts.read().await.get(account_id).cloned()
    }

    pub async fn all(&self) -> Vec<SharedBackend> {
        self.accounts.read().await.values().cloned().collect()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.accounts.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }

    /// Live capacity of every reachable account. Accounts whose capacity
    /// query fails are left out of placement.
    pub async fn snapshots(&self, retry: &RetryPolicy) -> Vec<AccountSnapshot> {
        let backends = self.all().await;
        let queries = backends.iter().map(|b| async move {
            let result = retry.run(b.account_id(), "capacity", || b.snapshot()).await;
            (b.account_id().to_string(), result)
        });

        let mut out = Vec::with_capacity(backends.len());
        for (account_id, result) in futures::future::join_all(queries).await {
            match result {
                Ok(snapshot) => out.push(snapshot),
                Err(e) => warn!(account = %account_id, error = %e, "capacity query failed, skipping account"),
            }
        }
        out
    }
}
