//! `VaultService`: the API object a UI or CLI drives
//!
//! One service owns one vault directory and the accounts connected to it.
//! Each call takes at most one [`Session`](crate::vault::Session), so a
//! concurrent `lock_vault` waits for it and then wins.

use bytes::Bytes;
use secrecy::SecretString;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use strata_core::config::StrataConfig;
use strata_core::types::{
    AccessibilityReport, AccountSnapshot, AccountStats, BackupDescriptor, ChunkQuery,
    CompatibilityReport, DeleteReport, DetectedBackups, DiscoveryReport, FileEntry, FileStatus,
    InitSummary, RemapReport, RemoteChunkInfo, RestorationSummary, StorageSummary, UnlockSummary,
    VaultStatus,
};
use strata_core::{StrataError, StrataResult};
use strata_storage::{check_health, AccountHealth, SharedBackend};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::accounts::AccountPool;
use crate::events::{EventBus, VaultEvent};
use crate::store::VaultStore;
use crate::transfer::TransferSettings;
use crate::vault::VaultManager;
use crate::{discovery, drive, restore, transfer, unix_now};

pub struct VaultService {
    config: StrataConfig,
    manager: VaultManager,
    pool: AccountPool,
    transfer: TransferSettings,
    events: EventBus,
}

impl VaultService {
    /// Build a service over `config.vault.dir`. No accounts are connected yet.
    pub fn new(config: StrataConfig) -> StrataResult<Self> {
        config.validate()?;
        let store = VaultStore::new(&config.vault.dir);
        let manager = VaultManager::open(store, config.crypto.kdf_params())?;
        Ok(Self {
            transfer: TransferSettings::from_config(&config),
            config,
            manager,
            pool: AccountPool::new(),
            events: EventBus::default(),
        })
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.events.subscribe()
    }

    // ── vault lifecycle ────────────────────────────────────────────────

    pub async fn initialize_vault(&self, password: &SecretString) -> StrataResult<InitSummary> {
        self.manager.create(password).await
    }

    pub async fn unlock_vault(&self, password: &SecretString, salt: &str) -> StrataResult<UnlockSummary> {
        let files_loaded = self.manager.unlock(password, salt).await?;
        Ok(UnlockSummary {
            accounts_loaded: self.pool.len().await,
            files_loaded,
        })
    }

    /// Returns true if the vault was unlocked.
    pub async fn lock_vault(&self) -> bool {
        let locked = self.manager.lock().await;
        if locked {
            self.events.emit(VaultEvent::VaultLocked);
        }
        locked
    }

    pub async fn vault_status(&self) -> VaultStatus {
        self.manager.status().await
    }

    // ── accounts ───────────────────────────────────────────────────────

    /// Returns true if the account was not connected before.
    pub async fn connect_account(&self, backend: SharedBackend) -> bool {
        let account_id = backend.account_id().to_string();
        let identity = backend.identity().to_string();
        let added = self.pool.connect(backend).await;
        if added {
            info!(account = %account_id, identity = %identity, "account connected");
            self.events.emit(VaultEvent::AccountAdded { account_id, identity });
        }
        added
    }

    pub async fn disconnect_account(&self, account_id: &str) -> bool {
        let removed = self.pool.disconnect(account_id).await.is_some();
        if removed {
            info!(account = %account_id, "account disconnected");
        }
        removed
    }

    pub async fn accounts(&self) -> Vec<AccountSnapshot> {
        self.pool.snapshots(&self.transfer.retry).await
    }

    pub async fn check_health(&self) -> Vec<AccountHealth> {
        let backends = self.pool.all().await;
        futures::future::join_all(backends.iter().map(|b| check_health(&**b))).await
    }

    // ── files ──────────────────────────────────────────────────────────

    pub async fn upload_file(
        &self,
        data: impl Into<Bytes>,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> StrataResult<FileEntry> {
        self.upload_file_with_cancel(data, name, metadata, &CancellationToken::new())
            .await
    }

    pub async fn upload_file_with_cancel(
        &self,
        data: impl Into<Bytes>,
        name: &str,
        metadata: BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> StrataResult<FileEntry> {
        let session = self.manager.session().await?;
        let entry = transfer::upload_file(
            &session,
            &self.pool,
            &self.transfer,
            data.into(),
            name,
            metadata,
            cancel,
        )
        .await?;
        self.events.emit(VaultEvent::FileUploaded {
            file_id: entry.file_id.clone(),
            name: entry.name.clone(),
            size: entry.size,
            chunk_count: entry.chunk_count,
        });
        Ok(entry)
    }

    /// Every registered file with its reachability over connected accounts.
    pub async fn list_files(&self) -> StrataResult<Vec<FileStatus>> {
        let registry = self.manager.session().await?.snapshot().await;
        let connected: HashSet<String> = self.pool.ids().await.into_iter().collect();
        Ok(registry
            .list()
            .into_iter()
            .map(|entry| {
                let mut missing: Vec<String> = entry
                    .account_ids()
                    .into_iter()
                    .filter(|a| !connected.contains(a))
                    .collect();
                missing.sort();
                missing.dedup();
                FileStatus {
                    entry: entry.clone(),
                    accessible: missing.is_empty(),
                    missing_accounts: missing,
                }
            })
            .collect())
    }

    pub async fn download_file(&self, file_id: &str) -> StrataResult<Vec<u8>> {
        let session = self.manager.session().await?;
        transfer::download_file(&session, &self.pool, &self.transfer, file_id).await
    }

    pub async fn delete_file(&self, file_id: &str) -> StrataResult<DeleteReport> {
        let session = self.manager.session().await?;
        let report = transfer::delete_file(&session, &self.pool, &self.transfer, file_id).await?;
        self.events.emit(VaultEvent::FileDeleted {
            file_id: file_id.to_string(),
            orphaned_chunks: report.orphaned_chunks,
        });
        Ok(report)
    }

    pub async fn purge_orphans(&self) -> StrataResult<usize> {
        let session = self.manager.session().await?;
        transfer::purge_orphans(&session, &self.pool, &self.transfer).await
    }

    // ── drive introspection ────────────────────────────────────────────

    pub async fn list_chunks_for_account(
        &self,
        account_id: &str,
        query: &ChunkQuery,
    ) -> StrataResult<Vec<RemoteChunkInfo>> {
        let registry = self.manager.session().await?.snapshot().await;
        drive::list_chunks_for_account(&registry, &self.pool, &self.transfer.retry, account_id, query).await
    }

    pub async fn get_account_stats(&self, account_id: &str) -> StrataResult<AccountStats> {
        let registry = self.manager.session().await?.snapshot().await;
        drive::get_account_stats(&registry, &self.pool, &self.transfer.retry, account_id).await
    }

    pub async fn download_raw_chunk(&self, account_id: &str, remote_object_id: &str) -> StrataResult<Vec<u8>> {
        let _session = self.manager.session().await?;
        drive::download_raw_chunk(&self.pool, &self.transfer.retry, account_id, remote_object_id).await
    }

    pub async fn delete_raw_chunk(&self, account_id: &str, remote_object_id: &str) -> StrataResult<()> {
        let registry = self.manager.session().await?.snapshot().await;
        drive::delete_raw_chunk(&registry, &self.pool, &self.transfer.retry, account_id, remote_object_id).await
    }

    // ── discovery and backup ───────────────────────────────────────────

    pub async fn refresh_discovery(&self) -> StrataResult<DiscoveryReport> {
        let session = self.manager.session().await?;
        discovery::refresh_discovery(&session, &self.pool, &self.transfer.retry).await
    }

    /// The registry as a sealed blob, readable only with the vault password.
    pub async fn export_registry(&self) -> StrataResult<Vec<u8>> {
        let session = self.manager.session().await?;
        let registry = session.snapshot().await;
        session.seal_registry(&registry)
    }

    /// The non-secret vault descriptor. Works while locked.
    pub async fn export_vault_backup(&self) -> StrataResult<BackupDescriptor> {
        self.manager
            .header()
            .await
            .map(|h| h.descriptor(unix_now()))
            .ok_or(StrataError::VaultNotInitialized)
    }

    /// Write both backups into `dir`, or the configured backup directory.
    pub async fn export_to_dir(&self, dir: Option<&Path>) -> StrataResult<(PathBuf, PathBuf)> {
        let blob = self.export_registry().await?;
        let descriptor = self.export_vault_backup().await?;
        let dir = dir.unwrap_or(self.config.vault.backup_dir.as_path());
        restore::write_backups(dir, &descriptor, &blob)
    }

    /// Merge a sealed registry blob from this vault. Entries already present
    /// are kept; returns the number imported.
    pub async fn import_registry(&self, blob: &[u8]) -> StrataResult<usize> {
        let session = self.manager.session().await?;
        let incoming = session.open_registry(blob)?;
        let entries: Vec<FileEntry> = incoming.list().into_iter().cloned().collect();
        let imported = session.mutate(move |r| Ok(r.merge(entries))).await?;
        info!(imported, "registry imported");
        Ok(imported)
    }

    /// Lock and remove the local vault files. Remote chunks are untouched.
    pub async fn clear_all_data(&self) -> StrataResult<()> {
        if self.manager.lock().await {
            self.events.emit(VaultEvent::VaultLocked);
        }
        self.manager.clear().await
    }

    // ── restore ────────────────────────────────────────────────────────

    pub fn detect_backups(&self) -> StrataResult<DetectedBackups> {
        restore::detect_backups(&self.config.vault.backup_dir)
    }

    pub fn check_compatibility(
        &self,
        descriptor: &BackupDescriptor,
        registry_blob: Option<&[u8]>,
    ) -> CompatibilityReport {
        restore::check_compatibility(descriptor, registry_blob)
    }

    pub async fn validate_password(
        &self,
        descriptor: &BackupDescriptor,
        password: &SecretString,
    ) -> StrataResult<bool> {
        restore::validate_password(descriptor, password).await
    }

    pub async fn complete_restoration(
        &self,
        descriptor: &BackupDescriptor,
        registry_blob: Option<&[u8]>,
        password: &SecretString,
    ) -> StrataResult<RestorationSummary> {
        restore::complete_restoration(&self.manager, descriptor, registry_blob, password).await
    }

    pub async fn analyze_missing_accounts(&self) -> StrataResult<AccessibilityReport> {
        let registry = self.manager.session().await?.snapshot().await;
        let connected: HashSet<String> = self.pool.ids().await.into_iter().collect();
        Ok(restore::analyze_missing_accounts(&registry, &connected))
    }

    pub async fn fix_account_mapping(&self) -> StrataResult<RemapReport> {
        let session = self.manager.session().await?;
        let connected: BTreeMap<String, String> = self
            .pool
            .all()
            .await
            .iter()
            .map(|b| (b.account_id().to_string(), b.identity().to_string()))
            .collect();
        restore::fix_account_mapping(&session, &connected).await
    }

    // ── summary ────────────────────────────────────────────────────────

    pub async fn storage_summary(&self) -> StrataResult<StorageSummary> {
        let registry = self.manager.session().await?.snapshot().await;
        let accounts = self.accounts().await;
        let total_capacity = accounts.iter().map(|a| a.capacity_total).sum();
        let total_used = accounts.iter().map(|a| a.capacity_used).sum();
        let total_free = accounts.iter().map(|a| a.free()).sum();
        Ok(StorageSummary {
            accounts,
            total_capacity,
            total_used,
            total_free,
            file_count: registry.len(),
            chunk_count: registry.chunk_count(),
            stored_bytes: registry.list().iter().map(|f| f.encrypted_size()).sum(),
        })
    }
}
