//! File registry: the authoritative map of files to chunk placements
//!
//! Persisted as one sealed blob. All mutation goes through
//! [`UnlockedVault::mutate`](crate::vault::UnlockedVault::mutate), which
//! serializes writers and persists before the change becomes visible.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use strata_core::types::{ChunkRecord, FileEntry, OrphanedChunk};
use strata_core::{StrataError, StrataResult};

const REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRegistry {
    version: u32,
    files: BTreeMap<String, FileEntry>,
    /// Chunks whose delete did not succeed within the retry budget
    #[serde(default)]
    orphans: Vec<OrphanedChunk>,
}

impl Default for FileRegistry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            files: BTreeMap::new(),
            orphans: Vec::new(),
        }
    }
}

impl FileRegistry {
    pub fn from_bytes(data: &[u8]) -> StrataResult<Self> {
        let registry: FileRegistry = serde_json::from_slice(data)
            .map_err(|e| StrataError::integrity(format!("registry does not parse: {e}")))?;
        if registry.version != REGISTRY_VERSION {
            return Err(StrataError::integrity(format!(
                "unsupported registry version {}",
                registry.version
            )));
        }
        Ok(registry)
    }

    pub fn to_bytes(&self) -> StrataResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn add(&mut self, entry: FileEntry) -> StrataResult<()> {
        if !entry.is_consistent() {
            return Err(StrataError::RegistryConflict(format!(
                "file {} has {} chunk records for chunk_count {}",
                entry.file_id,
                entry.chunks.len(),
                entry.chunk_count
            )));
        }
        if self.files.contains_key(&entry.file_id) {
            return Err(StrataError::RegistryConflict(format!(
                "file {} already registered",
                entry.file_id
            )));
        }
        self.files.insert(entry.file_id.clone(), entry);
        Ok(())
    }

    pub fn remove(&mut self, file_id: &str) -> Option<FileEntry> {
        self.files.remove(file_id)
    }

    pub fn get(&self, file_id: &str) -> Option<&FileEntry> {
        self.files.get(file_id)
    }

    /// Files ordered by creation time, then name
    pub fn list(&self) -> Vec<&FileEntry> {
        let mut files: Vec<&FileEntry> = self.files.values().collect();
        files.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.file_id.cmp(&b.file_id))
        });
        files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn chunk_count(&self) -> usize {
        self.files.values().map(|f| f.chunks.len()).sum()
    }

    /// Add entries whose file_id is not yet present; existing entries win.
    ///
    /// Returns the number of entries added.
    pub fn merge(&mut self, entries: impl IntoIterator<Item = FileEntry>) -> usize {
        let mut added = 0;
        for entry in entries {
            if self.files.contains_key(&entry.file_id) || !entry.is_consistent() {
                continue;
            }
            self.files.insert(entry.file_id.clone(), entry);
            added += 1;
        }
        added
    }

    /// Remote object ids referenced by any file or by the orphan ledger
    pub fn known_object_ids(&self) -> HashSet<String> {
        self.files
            .values()
            .flat_map(|f| f.chunks.iter())
            .chain(self.orphans.iter().map(|o| &o.record))
            .map(|c| c.remote_object_id.clone())
            .collect()
    }

    /// The file and chunk that own a remote object, if any
    pub fn find_object(&self, account_id: &str, remote_object_id: &str) -> Option<(&FileEntry, &ChunkRecord)> {
        self.files.values().find_map(|f| {
            f.chunks
                .iter()
                .find(|c| c.account_id == account_id && c.remote_object_id == remote_object_id)
                .map(|c| (f, c))
        })
    }

    /// Rewrite chunk placements (files and orphans) for which `remap` yields
    /// a new account id. Returns the number of records changed.
    pub fn remap_accounts(&mut self, mut remap: impl FnMut(&ChunkRecord) -> Option<String>) -> usize {
        let mut changed = 0;
        let records = self
            .files
            .values_mut()
            .flat_map(|f| f.chunks.iter_mut())
            .chain(self.orphans.iter_mut().map(|o| &mut o.record));
        for record in records {
            if let Some(new_id) = remap(record) {
                if new_id != record.account_id {
                    record.account_id = new_id;
                    changed += 1;
                }
            }
        }
        changed
    }

    pub fn orphans(&self) -> &[OrphanedChunk] {
        &self.orphans
    }

    pub fn add_orphans(&mut self, orphans: impl IntoIterator<Item = OrphanedChunk>) {
        self.orphans.extend(orphans);
    }

    /// Drop orphan records for objects that are now confirmed gone.
    pub fn clear_orphans(&mut self, purged: &HashSet<String>) -> usize {
        let before = self.orphans.len();
        self.orphans
            .retain(|o| !purged.contains(&o.record.remote_object_id));
        before - self.orphans.len()
    }
}
