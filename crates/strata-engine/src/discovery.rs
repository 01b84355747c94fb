//! Registry reconstruction from stored chunk headers
//!
//! Every remote object not referenced by the registry gets its header read
//! and decrypted. Chunks are grouped by file id; a group holding every index
//! `0..chunk_count` becomes a registry entry marked `discovered`. Incomplete
//! groups persist across refreshes, so a file split over accounts that are
//! connected at different times still converges.

use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use strata_chunks::{hash_to_hex, Hash};
use strata_core::types::{ChunkRecord, DiscoveryReport, FileEntry, RemoteObject};
use strata_core::StrataResult;
use strata_crypto::{ChunkHeader, DerivedKey, HEADER_LEN, ID_SIZE};
use strata_storage::{RetryPolicy, SharedBackend};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accounts::AccountPool;
use crate::transfer::UploadPhase;
use crate::vault::UnlockedVault;

const HEADER_READ_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
struct Candidate {
    header: ChunkHeader,
    account_id: String,
    account_identity: String,
    remote_object_id: String,
    encrypted_size: u64,
}

impl Candidate {
    fn record(&self) -> ChunkRecord {
        ChunkRecord {
            index: self.header.index,
            account_id: self.account_id.clone(),
            account_identity: self.account_identity.clone(),
            remote_object_id: self.remote_object_id.clone(),
            encrypted_size: self.encrypted_size,
            content_fingerprint: hash_to_hex(&Hash::from(self.header.content_fingerprint)),
        }
    }
}

/// Partially seen files, keyed by binary file id
#[derive(Debug, Default)]
pub struct PendingGroups {
    groups: HashMap<[u8; ID_SIZE], BTreeMap<u32, Candidate>>,
}

impl PendingGroups {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Forget what an account contributed; a fresh listing replaces it.
    fn drop_account(&mut self, account_id: &str) {
        for group in self.groups.values_mut() {
            group.retain(|_, c| c.account_id != account_id);
        }
        self.groups.retain(|_, g| !g.is_empty());
    }

    fn insert(&mut self, candidate: Candidate) {
        let group = self.groups.entry(candidate.header.file_id).or_default();
        if let Some(existing) = group.get(&candidate.header.index) {
            debug!(
                index = candidate.header.index,
                kept = %existing.remote_object_id,
                ignored = %candidate.remote_object_id,
                "duplicate chunk slot during discovery"
            );
            return;
        }
        group.insert(candidate.header.index, candidate);
    }

    /// Groups that hold every slot, as registry entries
    fn complete(&self) -> Vec<([u8; ID_SIZE], FileEntry)> {
        self.groups
            .iter()
            .filter_map(|(id, group)| assemble(id, group).map(|entry| (*id, entry)))
            .collect()
    }

    fn remove(&mut self, ids: &[[u8; ID_SIZE]]) {
        for id in ids {
            self.groups.remove(id);
        }
    }
}

fn assemble(file_id: &[u8; ID_SIZE], group: &BTreeMap<u32, Candidate>) -> Option<FileEntry> {
    let first = group.values().next()?;
    let count = first.header.chunk_count;
    if group.len() != count as usize {
        return None;
    }
    let agrees = group.iter().enumerate().all(|(i, (index, c))| {
        *index == i as u32
            && c.header.chunk_count == count
            && c.header.file_size == first.header.file_size
    });
    if !agrees {
        return None;
    }

    Some(FileEntry {
        file_id: Uuid::from_bytes(*file_id).to_string(),
        name: first.header.name.clone(),
        size: first.header.file_size,
        created_at: first.header.created_at,
        chunk_count: count,
        chunks: group.values().map(Candidate::record).collect(),
        discovered: true,
        // headers carry no metadata
        metadata: BTreeMap::new(),
    })
}

struct AccountScan {
    scanned: usize,
    skipped: usize,
    candidates: Vec<Candidate>,
}

async fn read_candidate(
    backend: &SharedBackend,
    retry: &RetryPolicy,
    header_key: &DerivedKey,
    object: RemoteObject,
) -> Option<Candidate> {
    let account_id = backend.account_id();
    let raw = match retry
        .run(account_id, "read header", || backend.read_header(&object.remote_object_id, HEADER_LEN))
        .await
    {
        Ok(raw) => raw,
        Err(e) => {
            debug!(account = %account_id, object = %object.remote_object_id, error = %e, "header unreadable");
            return None;
        }
    };
    match ChunkHeader::open(header_key, &raw) {
        Ok(header) => Some(Candidate {
            header,
            account_id: account_id.to_string(),
            account_identity: backend.identity().to_string(),
            remote_object_id: object.remote_object_id,
            encrypted_size: object.size,
        }),
        Err(e) => {
            // foreign object, another vault, or a damaged header
            debug!(account = %account_id, object = %object.remote_object_id, error = %e, "skipping object");
            None
        }
    }
}

async fn scan_account(
    backend: SharedBackend,
    retry: &RetryPolicy,
    header_key: &DerivedKey,
    known: &HashSet<String>,
) -> StrataResult<AccountScan> {
    let objects = retry
        .run(backend.account_id(), "list", || backend.list())
        .await?;
    let unknown: Vec<RemoteObject> = objects
        .into_iter()
        .filter(|o| !known.contains(&o.remote_object_id))
        .collect();
    let scanned = unknown.len();

    let backend = &backend;
    let candidates: Vec<Candidate> = stream::iter(unknown)
        .map(|object| read_candidate(backend, retry, header_key, object))
        .buffer_unordered(HEADER_READ_CONCURRENCY)
        .filter_map(|c| async move { c })
        .collect()
        .await;

    Ok(AccountScan {
        scanned,
        skipped: scanned - candidates.len(),
        candidates,
    })
}

/// Scan every connected account for chunks the registry does not know and
/// register each file whose chunks are now all accounted for.
///
/// An account whose listing fails keeps its previously seen candidates and
/// is reported in `failed_accounts`.
pub async fn refresh_discovery(
    vault: &UnlockedVault,
    pool: &AccountPool,
    retry: &RetryPolicy,
) -> StrataResult<DiscoveryReport> {
    let known = vault.snapshot().await.known_object_ids();
    let header_key = vault.keys().header_key();
    let backends = pool.all().await;

    let scans = backends.into_iter().map(|backend| {
        let known = &known;
        async move {
            let account_id = backend.account_id().to_string();
            (account_id, scan_account(backend, retry, header_key, known).await)
        }
    });
    let results = futures::future::join_all(scans).await;

    let mut report = DiscoveryReport::default();
    // lock order: pending, then registry (inside mutate)
    let mut pending = vault.pending.lock().await;
    for (account_id, result) in results {
        match result {
            Ok(scan) => {
                pending.drop_account(&account_id);
                report.scanned_objects += scan.scanned;
                report.skipped_objects += scan.skipped;
                for candidate in scan.candidates {
                    pending.insert(candidate);
                }
            }
            Err(e) => {
                warn!(account = %account_id, error = %e, "discovery listing failed");
                report.failed_accounts.push(account_id);
            }
        }
    }

    let complete = pending.complete();
    if !complete.is_empty() {
        let uploads = &vault.uploads;
        let (added, settled) = vault
            .mutate(move |r| {
                // re-checked under the writer lock: an upload may have
                // committed since the scan started
                let known = r.known_object_ids();
                let mut settled = Vec::with_capacity(complete.len());
                let mut entries = Vec::new();
                for (id, entry) in complete {
                    match uploads.phase(&id) {
                        Some(UploadPhase::InFlight) => {
                            debug!(file_id = %entry.file_id, "upload in flight, leaving group pending");
                            continue;
                        }
                        Some(UploadPhase::Abandoned) => {
                            debug!(file_id = %entry.file_id, "dropping group of an abandoned upload");
                        }
                        None if r.get(&entry.file_id).is_some()
                            || entry.chunks.iter().any(|c| known.contains(&c.remote_object_id)) => {}
                        None => entries.push(entry),
                    }
                    settled.push(id);
                }
                Ok((r.merge(entries), settled))
            })
            .await?;
        report.newly_discovered = added;
        pending.remove(&settled);
    }
    report.pending_groups = pending.len();

    info!(
        discovered = report.newly_discovered,
        pending = report.pending_groups,
        scanned = report.scanned_objects,
        skipped = report.skipped_objects,
        failed = report.failed_accounts.len(),
        "discovery refreshed"
    );
    Ok(report)
}
