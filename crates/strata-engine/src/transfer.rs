//! Transfer pipeline: upload, download, and delete of whole files
//!
//! Upload: split → fingerprint → plan placements → (encrypt → seal header →
//! upload) per chunk on a bounded worker pool → commit the FileEntry.
//! Nothing is committed unless every chunk landed; chunks already stored by a
//! failed or cancelled upload are deleted again.
//!
//! Download: every placement must be on a connected account; chunks are
//! fetched concurrently, authenticated, fingerprint-checked, and reassembled
//! strictly by index.

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use strata_chunks::{fingerprint, fingerprint_chunks, hash_from_hex, hash_to_hex, reassemble, split, Hash};
use strata_core::config::StrataConfig;
use strata_core::types::{ChunkRecord, DeleteReport, FileEntry, OrphanedChunk};
use strata_core::{MissingPlacement, StrataError, StrataResult};
use strata_crypto::{decrypt_chunk, encrypt_chunk, encrypted_body_size, ChunkHeader, DerivedKey, HEADER_LEN, ID_SIZE};
use strata_storage::{RetryPolicy, SharedBackend, OBJECT_PREFIX};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accounts::AccountPool;
use crate::planner::plan;
use crate::vault::{parse_id, UnlockedVault};
use crate::unix_now;

/// Knobs for chunk transfers, derived from `[chunking]` and `[transfer]`.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub chunk_size: usize,
    /// Parallel chunk transfers per file
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Delete attempts per chunk before it is recorded as orphaned
    pub delete_attempts: u32,
}

impl TransferSettings {
    pub fn from_config(cfg: &StrataConfig) -> Self {
        Self {
            chunk_size: cfg.chunking.chunk_size,
            concurrency: cfg.transfer.concurrency.max(1),
            retry: RetryPolicy::from_config(&cfg.transfer),
            delete_attempts: cfg.transfer.delete_retry_budget.max(1),
        }
    }

    fn delete_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.delete_attempts.saturating_sub(1),
            ..self.retry
        }
    }
}

fn join_error(e: JoinError) -> StrataError {
    StrataError::Other(anyhow::anyhow!("chunk task failed: {e}"))
}

fn object_name() -> String {
    format!("{OBJECT_PREFIX}{}.chunk", Uuid::new_v4())
}

struct UploadJob {
    backend: SharedBackend,
    retry: RetryPolicy,
    chunk_key: Arc<DerivedKey>,
    header_key: Arc<DerivedKey>,
    header: ChunkHeader,
    plaintext: Bytes,
}

impl UploadJob {
    async fn run(self) -> StrataResult<ChunkRecord> {
        let h = &self.header;
        let body = encrypt_chunk(&self.chunk_key, &h.file_id, h.index, h.chunk_count, &self.plaintext)?;
        let sealed = h.seal(&self.header_key)?;
        // the name is fixed across retries so a write that landed before a
        // timeout is overwritten, not duplicated
        let name = object_name();
        let account_id = self.backend.account_id();

        let remote_object_id = self
            .retry
            .run(account_id, "upload", || self.backend.upload(&name, &sealed, &body))
            .await?;

        debug!(account = %account_id, index = h.index, object = %remote_object_id, "chunk uploaded");
        Ok(ChunkRecord {
            index: h.index,
            account_id: account_id.to_string(),
            account_identity: self.backend.identity().to_string(),
            remote_object_id,
            encrypted_size: (sealed.len() + body.len()) as u64,
            content_fingerprint: hash_to_hex(&Hash::from(h.content_fingerprint)),
        })
    }
}

/// Where an uncommitted upload stands, as seen by discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    /// Chunks may be landing; the upload has not committed yet
    InFlight,
    /// Ended without a commit; its chunks were deleted or orphaned
    Abandoned,
}

/// File ids of uploads on this vault that have not committed.
///
/// Chunks become visible on the backends before their upload commits, so
/// discovery consults this before registering a group.
#[derive(Debug, Default)]
pub struct UploadTracker {
    inner: Mutex<TrackedUploads>,
}

#[derive(Debug, Default)]
struct TrackedUploads {
    active: HashSet<[u8; ID_SIZE]>,
    abandoned: HashSet<[u8; ID_SIZE]>,
}

impl UploadTracker {
    fn lock(&self) -> MutexGuard<'_, TrackedUploads> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `file_id` until the returned guard is committed or dropped.
    pub fn begin(&self, file_id: [u8; ID_SIZE]) -> UploadGuard<'_> {
        self.lock().active.insert(file_id);
        UploadGuard {
            tracker: self,
            file_id,
            committed: false,
        }
    }

    pub fn phase(&self, file_id: &[u8; ID_SIZE]) -> Option<UploadPhase> {
        let tracked = self.lock();
        if tracked.active.contains(file_id) {
            Some(UploadPhase::InFlight)
        } else if tracked.abandoned.contains(file_id) {
            Some(UploadPhase::Abandoned)
        } else {
            None
        }
    }
}

/// Releases an upload's claim. Dropped without [`UploadGuard::commit`], the
/// file id is remembered as abandoned.
pub struct UploadGuard<'a> {
    tracker: &'a UploadTracker,
    file_id: [u8; ID_SIZE],
    committed: bool,
}

impl UploadGuard<'_> {
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        let mut tracked = self.tracker.lock();
        tracked.active.remove(&self.file_id);
        if !self.committed {
            tracked.abandoned.insert(self.file_id);
        }
    }
}

fn absorb(
    done: Result<StrataResult<ChunkRecord>, JoinError>,
    uploaded: &mut Vec<ChunkRecord>,
    failure: &mut Option<StrataError>,
) {
    match done {
        Ok(Ok(record)) => uploaded.push(record),
        Ok(Err(e)) => {
            failure.get_or_insert(e);
        }
        Err(e) => {
            failure.get_or_insert(join_error(e));
        }
    }
}

/// Upload `data` as a new file and commit it to the registry.
///
/// Fails with `InsufficientStorage` before any I/O when the file cannot be
/// placed. Cancellation stops scheduling new chunks; chunks in flight finish,
/// then everything stored so far is deleted and `UploadCancelled` returned.
pub async fn upload_file(
    vault: &UnlockedVault,
    pool: &AccountPool,
    settings: &TransferSettings,
    data: Bytes,
    name: &str,
    metadata: BTreeMap<String, String>,
    cancel: &CancellationToken,
) -> StrataResult<FileEntry> {
    let file_uuid = Uuid::new_v4();
    let file_id = file_uuid.to_string();
    let id_bytes: [u8; ID_SIZE] = *file_uuid.as_bytes();
    let created_at = unix_now();
    let claim = vault.uploads.begin(id_bytes);

    let chunks = split(data.len(), settings.chunk_size);
    let chunk_count = chunks.len() as u32;
    let fingerprints = {
        let data = data.clone();
        let chunks = chunks.clone();
        tokio::task::spawn_blocking(move || fingerprint_chunks(&data, &chunks))
            .await
            .map_err(join_error)?
    };
    let sizes: Vec<u64> = chunks
        .iter()
        .map(|c| (HEADER_LEN + encrypted_body_size(c.length)) as u64)
        .collect();

    let accounts = pool.snapshots(&settings.retry).await;
    let placements = plan(&sizes, &accounts)?;
    debug!(file_id = %file_id, chunks = chunk_count, accounts = accounts.len(), "placement planned");

    let chunk_key = Arc::new(vault.keys().chunk_key(&id_bytes)?);
    let header_key = Arc::new(vault.keys().header_key().clone());
    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));

    let mut tasks = JoinSet::new();
    let mut uploaded = Vec::with_capacity(chunks.len());
    let mut failure: Option<StrataError> = None;
    let mut cancelled = false;

    for (chunk, placement) in chunks.iter().zip(&placements) {
        while let Some(done) = tasks.try_join_next() {
            absorb(done, &mut uploaded, &mut failure);
        }
        if failure.is_some() {
            break;
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(e) => {
                    failure = Some(StrataError::Other(anyhow::anyhow!("worker pool closed: {e}")));
                    break;
                }
            },
        };

        let Some(backend) = pool.get(&placement.account_id).await else {
            failure = Some(StrataError::AccountNotFound(placement.account_id.clone()));
            break;
        };

        let job = UploadJob {
            backend,
            retry: settings.retry,
            chunk_key: chunk_key.clone(),
            header_key: header_key.clone(),
            header: ChunkHeader {
                file_id: id_bytes,
                index: chunk.index,
                chunk_count,
                file_size: data.len() as u64,
                created_at,
                content_fingerprint: *fingerprints[chunk.index as usize].as_bytes(),
                name: name.to_string(),
            },
            plaintext: data.slice(chunk.offset as usize..chunk.offset as usize + chunk.length),
        };
        tasks.spawn(async move {
            let _permit = permit;
            job.run().await
        });
    }

    while let Some(done) = tasks.join_next().await {
        absorb(done, &mut uploaded, &mut failure);
    }
    if failure.is_none() && cancel.is_cancelled() {
        cancelled = true;
    }

    if cancelled || failure.is_some() {
        warn!(
            file_id = %file_id,
            stored = uploaded.len(),
            cancelled,
            error = ?failure.as_ref().map(|e| e.to_string()),
            "upload aborted, rolling back stored chunks"
        );
        rollback(vault, pool, settings, &file_id, uploaded).await;
        return Err(match failure {
            Some(e) if !cancelled => e,
            _ => StrataError::UploadCancelled { file_id },
        });
    }

    uploaded.sort_by_key(|r| r.index);
    let entry = FileEntry {
        file_id: file_id.clone(),
        name: name.to_string(),
        size: data.len() as u64,
        created_at,
        chunk_count,
        chunks: uploaded,
        discovered: false,
        metadata,
    };

    let committed = entry.clone();
    if let Err(e) = vault.mutate(move |r| r.add(committed)).await {
        warn!(file_id = %file_id, error = %e, "registry commit failed, rolling back");
        rollback(vault, pool, settings, &file_id, entry.chunks).await;
        return Err(e);
    }
    claim.commit();

    info!(
        file_id = %entry.file_id,
        name = %entry.name,
        bytes = entry.size,
        chunks = entry.chunk_count,
        "file uploaded"
    );
    Ok(entry)
}

/// Best-effort delete of chunks from an aborted upload. Anything that
/// cannot be deleted goes to the orphan ledger.
async fn rollback(
    vault: &UnlockedVault,
    pool: &AccountPool,
    settings: &TransferSettings,
    file_id: &str,
    records: Vec<ChunkRecord>,
) {
    let orphans = delete_chunks(pool, settings, file_id, records).await;
    if orphans.is_empty() {
        return;
    }
    let count = orphans.len();
    if let Err(e) = vault
        .mutate(move |r| {
            r.add_orphans(orphans);
            Ok(())
        })
        .await
    {
        warn!(file_id = %file_id, error = %e, "could not record orphaned chunks");
    } else {
        warn!(file_id = %file_id, orphans = count, "rollback left orphaned chunks");
    }
}

/// Delete one chunk. Missing objects count as deleted.
async fn delete_chunk(pool: &AccountPool, policy: &RetryPolicy, record: &ChunkRecord) -> Result<(), String> {
    let Some(backend) = pool.get(&record.account_id).await else {
        return Err(format!("account {} not connected", record.account_id));
    };
    match policy
        .run(&record.account_id, "delete", || backend.delete(&record.remote_object_id))
        .await
    {
        Ok(()) | Err(StrataError::ObjectNotFound { .. }) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

/// Delete `records` concurrently; returns the ones that could not be deleted.
async fn delete_chunks(
    pool: &AccountPool,
    settings: &TransferSettings,
    file_id: &str,
    records: Vec<ChunkRecord>,
) -> Vec<OrphanedChunk> {
    let policy = settings.delete_policy();
    let policy = &policy;
    let now = unix_now();
    stream::iter(records)
        .map(|record| async move {
            let result = delete_chunk(pool, policy, &record).await;
            (record, result)
        })
        .buffer_unordered(settings.concurrency.max(1))
        .filter_map(|(record, result)| async move {
            result.err().map(|reason| {
                warn!(
                    account = %record.account_id,
                    object = %record.remote_object_id,
                    reason = %reason,
                    "chunk delete failed, recording orphan"
                );
                OrphanedChunk {
                    file_id: file_id.to_string(),
                    record,
                    reason,
                    orphaned_at: now,
                }
            })
        })
        .collect()
        .await
}

struct DownloadJob {
    backend: SharedBackend,
    retry: RetryPolicy,
    chunk_key: Arc<DerivedKey>,
    header_key: Arc<DerivedKey>,
    file_id: [u8; ID_SIZE],
    chunk_count: u32,
    record: ChunkRecord,
}

impl DownloadJob {
    async fn run(self) -> StrataResult<(u32, Vec<u8>)> {
        let rec = &self.record;
        let object = self
            .retry
            .run(&rec.account_id, "download", || self.backend.download(&rec.remote_object_id))
            .await?;

        let header = ChunkHeader::open(&self.header_key, &object)?;
        if header.file_id != self.file_id
            || header.index != rec.index
            || header.chunk_count != self.chunk_count
        {
            return Err(StrataError::integrity(format!(
                "chunk {} on {} does not belong to this file slot",
                rec.index, rec.account_id
            )));
        }

        let plaintext = decrypt_chunk(
            &self.chunk_key,
            &self.file_id,
            rec.index,
            self.chunk_count,
            &object[HEADER_LEN..],
        )?;
        let expected = hash_from_hex(&rec.content_fingerprint)
            .map_err(|e| StrataError::integrity(format!("chunk {}: {e}", rec.index)))?;
        if fingerprint(&plaintext) != expected {
            return Err(StrataError::integrity(format!(
                "chunk {} fingerprint mismatch",
                rec.index
            )));
        }
        Ok((rec.index, plaintext))
    }
}

/// Fetch, verify, and reassemble a file.
pub async fn download_file(
    vault: &UnlockedVault,
    pool: &AccountPool,
    settings: &TransferSettings,
    file_id: &str,
) -> StrataResult<Vec<u8>> {
    let entry = vault
        .snapshot()
        .await
        .get(file_id)
        .cloned()
        .ok_or_else(|| StrataError::FileNotFound(file_id.to_string()))?;

    let mut backends = Vec::with_capacity(entry.chunks.len());
    let mut missing = Vec::new();
    for record in &entry.chunks {
        match pool.get(&record.account_id).await {
            Some(backend) => backends.push(backend),
            None => missing.push(MissingPlacement {
                index: record.index,
                account_id: record.account_id.clone(),
            }),
        }
    }
    if !missing.is_empty() {
        warn!(file_id = %file_id, missing = missing.len(), "file has chunks on disconnected accounts");
        return Err(StrataError::PartialFileUnavailable {
            file_id: file_id.to_string(),
            missing,
        });
    }

    let id_bytes = parse_id(&entry.file_id)?;
    let chunk_key = Arc::new(vault.keys().chunk_key(&id_bytes)?);
    let header_key = Arc::new(vault.keys().header_key().clone());
    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));

    let mut tasks = JoinSet::new();
    for (record, backend) in entry.chunks.iter().cloned().zip(backends) {
        let job = DownloadJob {
            backend,
            retry: settings.retry,
            chunk_key: chunk_key.clone(),
            header_key: header_key.clone(),
            file_id: id_bytes,
            chunk_count: entry.chunk_count,
            record,
        };
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| StrataError::Other(anyhow::anyhow!("worker pool closed: {e}")))?;
            job.run().await
        });
    }

    let mut parts = Vec::with_capacity(entry.chunks.len());
    while let Some(done) = tasks.join_next().await {
        match done.map_err(join_error).and_then(|r| r) {
            Ok(part) => parts.push(part),
            Err(e) => {
                tasks.abort_all();
                return Err(e);
            }
        }
    }

    let data = reassemble(entry.chunk_count, parts)?;
    if data.len() as u64 != entry.size {
        return Err(StrataError::integrity(format!(
            "reassembled {} bytes, registry says {}",
            data.len(),
            entry.size
        )));
    }
    info!(file_id = %file_id, bytes = data.len(), "file downloaded");
    Ok(data)
}

/// Delete every chunk of a file, then drop it from the registry.
///
/// Chunks that cannot be deleted within the retry budget (or whose account
/// is not connected) move to the orphan ledger in the same commit, so no
/// live chunk is ever left unreferenced.
pub async fn delete_file(
    vault: &UnlockedVault,
    pool: &AccountPool,
    settings: &TransferSettings,
    file_id: &str,
) -> StrataResult<DeleteReport> {
    let entry = vault
        .snapshot()
        .await
        .get(file_id)
        .cloned()
        .ok_or_else(|| StrataError::FileNotFound(file_id.to_string()))?;

    let total = entry.chunks.len();
    let orphans = delete_chunks(pool, settings, file_id, entry.chunks).await;
    let report = DeleteReport {
        deleted_chunks: total - orphans.len(),
        orphaned_chunks: orphans.len(),
    };

    let id = file_id.to_string();
    vault
        .mutate(move |r| {
            r.remove(&id).ok_or_else(|| StrataError::FileNotFound(id.clone()))?;
            r.add_orphans(orphans);
            Ok(())
        })
        .await?;

    info!(
        file_id = %file_id,
        deleted = report.deleted_chunks,
        orphaned = report.orphaned_chunks,
        "file deleted"
    );
    Ok(report)
}

/// Retry deletes recorded in the orphan ledger. Returns how many were cleared.
pub async fn purge_orphans(
    vault: &UnlockedVault,
    pool: &AccountPool,
    settings: &TransferSettings,
) -> StrataResult<usize> {
    let orphans = vault.snapshot().await.orphans().to_vec();
    if orphans.is_empty() {
        return Ok(0);
    }
    let policy = settings.delete_policy();
    let mut purged = HashSet::new();
    for orphan in &orphans {
        match delete_chunk(pool, &policy, &orphan.record).await {
            Ok(()) => {
                purged.insert(orphan.record.remote_object_id.clone());
            }
            Err(reason) => debug!(object = %orphan.record.remote_object_id, reason = %reason, "orphan still present"),
        }
    }
    if purged.is_empty() {
        return Ok(0);
    }
    let cleared = vault.mutate(move |r| Ok(r.clear_orphans(&purged))).await?;
    info!(cleared, remaining = orphans.len() - cleared, "orphaned chunks purged");
    Ok(cleared)
}
