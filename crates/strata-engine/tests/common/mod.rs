//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use opendal::Operator;
use secrecy::SecretString;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_core::config::StrataConfig;
use strata_core::types::{CapacityReport, RemoteObject};
use strata_core::{StrataError, StrataResult};
use strata_engine::VaultService;
use strata_storage::{build_memory_operator, ChunkBackend, OpendalBackend, SharedBackend};

pub const MIB: u64 = 1024 * 1024;
pub const PASSWORD: &str = "correct-horse";

pub fn password() -> SecretString {
    SecretString::from(PASSWORD)
}

/// Config with a cheap KDF and no retry delays, rooted in `dir`.
pub fn test_config(dir: &Path, chunk_size: usize) -> StrataConfig {
    let mut config = StrataConfig::default();
    config.vault.dir = dir.join("vault");
    config.vault.backup_dir = dir.join("backups");
    config.chunking.chunk_size = chunk_size;
    config.crypto.argon2_mem_cost_kib = 1024;
    config.crypto.argon2_time_cost = 1;
    config.crypto.argon2_parallelism = 1;
    config.transfer.retry_base_delay_ms = 1;
    config.transfer.max_retries = 1;
    config.transfer.delete_retry_budget = 2;
    config
}

pub fn memory_operator() -> Operator {
    build_memory_operator().expect("memory operator")
}

pub fn account_on(op: Operator, id: &str, identity: &str, capacity: u64) -> Arc<OpendalBackend> {
    Arc::new(OpendalBackend::new(op, id, identity, capacity))
}

pub fn memory_account(id: &str, capacity: u64) -> Arc<OpendalBackend> {
    account_on(memory_operator(), id, &format!("{id}@example.com"), capacity)
}

/// A service over `dir` with an initialized, unlocked vault.
pub async fn unlocked_service(dir: &Path, chunk_size: usize) -> (VaultService, String) {
    let service = VaultService::new(test_config(dir, chunk_size)).expect("service");
    let init = service.initialize_vault(&password()).await.expect("init");
    service
        .unlock_vault(&password(), &init.salt)
        .await
        .expect("unlock");
    (service, init.salt)
}

/// Deterministic pseudo-random content
pub fn content(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(2_654_435_761).rotate_left(seed as u32 % 31) as u8 ^ seed)
        .collect()
}

/// Wraps a backend and fails selected calls on demand.
pub struct FaultyBackend {
    inner: SharedBackend,
    uploads: AtomicUsize,
    /// Uploads beyond this many fail permanently
    pub fail_uploads_after: AtomicUsize,
    pub fail_deletes: AtomicBool,
    /// Delay before an upload reaches the inner backend
    pub upload_delay: Duration,
    /// Delay after an upload is stored, before it is acknowledged
    pub ack_delay: Duration,
    pub download_delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FaultyBackend {
    pub fn new(inner: SharedBackend) -> Self {
        Self {
            inner,
            uploads: AtomicUsize::new(0),
            fail_uploads_after: AtomicUsize::new(usize::MAX),
            fail_deletes: AtomicBool::new(false),
            upload_delay: Duration::ZERO,
            ack_delay: Duration::ZERO,
            download_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = delay;
        self
    }

    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = delay;
        self
    }

    /// Most uploads and downloads ever running at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn reset_peak(&self) {
        self.peak.store(0, Ordering::SeqCst);
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    pub async fn object_count(&self) -> usize {
        self.inner.list().await.expect("list").len()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChunkBackend for FaultyBackend {
    fn account_id(&self) -> &str {
        self.inner.account_id()
    }

    fn identity(&self) -> &str {
        self.inner.identity()
    }

    async fn upload(&self, name: &str, header: &[u8], body: &[u8]) -> StrataResult<String> {
        let _running = self.enter();
        if !self.upload_delay.is_zero() {
            tokio::time::sleep(self.upload_delay).await;
        }
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);
        if n >= self.fail_uploads_after.load(Ordering::SeqCst) {
            return Err(StrataError::backend(self.account_id(), "injected upload failure"));
        }
        let id = self.inner.upload(name, header, body).await?;
        if !self.ack_delay.is_zero() {
            tokio::time::sleep(self.ack_delay).await;
        }
        Ok(id)
    }

    async fn download(&self, remote_object_id: &str) -> StrataResult<Vec<u8>> {
        let _running = self.enter();
        if !self.download_delay.is_zero() {
            tokio::time::sleep(self.download_delay).await;
        }
        self.inner.download(remote_object_id).await
    }

    async fn delete(&self, remote_object_id: &str) -> StrataResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StrataError::backend(self.account_id(), "injected delete failure"));
        }
        self.inner.delete(remote_object_id).await
    }

    async fn list(&self) -> StrataResult<Vec<RemoteObject>> {
        self.inner.list().await
    }

    async fn capacity(&self) -> StrataResult<CapacityReport> {
        self.inner.capacity().await
    }
}
