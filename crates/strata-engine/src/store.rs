//! On-disk vault layout
//!
//! ```text
//! <vault dir>/vault.json    clear header: id, salt, KDF params, verifier
//! <vault dir>/registry.bin  sealed registry blob
//! ```
//!
//! Both files are replaced atomically (write temp, then rename).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strata_core::types::{BackupDescriptor, KdfParams};
use strata_core::StrataResult;

pub const VAULT_FORMAT_VERSION: u32 = 1;

const HEADER_FILE: &str = "vault.json";
const REGISTRY_FILE: &str = "registry.bin";

/// The unencrypted part of a vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultHeader {
    pub format_version: u32,
    pub vault_id: String,
    /// base64 salt
    pub salt: String,
    pub kdf_params: KdfParams,
    /// hex verifier
    pub verifier: String,
    pub created_at: u64,
}

impl VaultHeader {
    pub fn descriptor(&self, exported_at: u64) -> BackupDescriptor {
        BackupDescriptor {
            format_version: self.format_version,
            vault_id: self.vault_id.clone(),
            salt: self.salt.clone(),
            kdf_params: self.kdf_params,
            verifier: self.verifier.clone(),
            created_at: self.created_at,
            exported_at,
        }
    }

    pub fn from_descriptor(d: &BackupDescriptor) -> Self {
        Self {
            format_version: d.format_version,
            vault_id: d.vault_id.clone(),
            salt: d.salt.clone(),
            kdf_params: d.kdf_params,
            verifier: d.verifier.clone(),
            created_at: d.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VaultStore {
    dir: PathBuf,
}

impl VaultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn header_path(&self) -> PathBuf {
        self.dir.join(HEADER_FILE)
    }

    fn registry_path(&self) -> PathBuf {
        self.dir.join(REGISTRY_FILE)
    }

    pub fn exists(&self) -> bool {
        self.header_path().exists()
    }

    pub fn load_header(&self) -> StrataResult<Option<VaultHeader>> {
        let path = self.header_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    pub fn save_header(&self, header: &VaultHeader) -> StrataResult<()> {
        let json = serde_json::to_vec_pretty(header)?;
        atomic_write(&self.header_path(), &json)
    }

    pub fn load_registry_blob(&self) -> StrataResult<Option<Vec<u8>>> {
        let path = self.registry_path();
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }

    pub fn save_registry_blob(&self, blob: &[u8]) -> StrataResult<()> {
        atomic_write(&self.registry_path(), blob)
    }

    /// Remove the vault files; the directory itself is left in place.
    pub fn clear(&self) -> StrataResult<()> {
        for path in [self.header_path(), self.registry_path()] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> StrataResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, data)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> VaultHeader {
        VaultHeader {
            format_version: VAULT_FORMAT_VERSION,
            vault_id: "3f0c1f8e-6c7a-4d7e-9b1a-1b2c3d4e5f60".into(),
            salt: "AAAAAAAAAAAAAAAAAAAAAA==".into(),
            kdf_params: KdfParams::default(),
            verifier: "ab".repeat(32),
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_header_persist_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = VaultStore::new(dir.path().join("vault"));
        assert!(!store.exists());
        assert!(store.load_header().unwrap().is_none());

        store.save_header(&header()).unwrap();
        store.save_registry_blob(b"sealed").unwrap();
        assert!(store.exists());
        assert_eq!(store.load_header().unwrap().unwrap(), header());
        assert_eq!(store.load_registry_blob().unwrap().unwrap(), b"sealed");
        assert!(!store.dir().join("vault.tmp").exists());

        store.clear().unwrap();
        assert!(!store.exists());
        assert!(store.load_registry_blob().unwrap().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_descriptor_roundtrip_keeps_secrets_out() {
        let d = header().descriptor(42);
        assert_eq!(d.exported_at, 42);
        let json = serde_json::to_string(&d).unwrap();
        assert!(!json.contains("key"));
        assert_eq!(VaultHeader::from_descriptor(&d).vault_id, header().vault_id);
    }

    #[test]
    fn test_restored_header_keeps_creation_time() {
        let d = header().descriptor(1_800_000_000);
        assert_eq!(d.created_at, 1_700_000_000);
        assert_eq!(VaultHeader::from_descriptor(&d), header());

        // older descriptors carry no creation time
        let mut json: serde_json::Value = serde_json::to_value(&d).unwrap();
        json.as_object_mut().unwrap().remove("created_at");
        let old: BackupDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(VaultHeader::from_descriptor(&old).created_at, 0);
    }
}
