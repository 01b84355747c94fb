//! Key hierarchy: master key → purpose-bound sub-keys via HKDF-SHA256

use hkdf::Hkdf;
use sha2::Sha256;
use strata_core::{StrataError, StrataResult};
use zeroize::Zeroize;

use crate::kdf::MasterKey;
use crate::{ID_SIZE, KEY_SIZE};

const INFO_REGISTRY: &[u8] = b"strata-registry";
const INFO_HEADER: &[u8] = b"strata-header";
const INFO_VERIFIER: &[u8] = b"strata-verifier";
const INFO_CHUNK: &[u8] = b"strata-chunk";

/// A 256-bit key derived from the master key. Zeroized on drop.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// All key material held by an unlocked vault.
///
/// Chunk keys are derived on demand from the master key and the file id, so
/// discovery can open chunks of files the registry has never seen.
#[derive(Debug)]
pub struct KeyRing {
    master: MasterKey,
    registry: DerivedKey,
    header: DerivedKey,
    verifier: DerivedKey,
}

impl KeyRing {
    pub fn new(master: MasterKey) -> StrataResult<Self> {
        let registry = hkdf_derive(master.as_bytes(), INFO_REGISTRY)?;
        let header = hkdf_derive(master.as_bytes(), INFO_HEADER)?;
        let verifier = hkdf_derive(master.as_bytes(), INFO_VERIFIER)?;
        Ok(Self {
            master,
            registry,
            header,
            verifier,
        })
    }

    pub fn registry_key(&self) -> &DerivedKey {
        &self.registry
    }

    pub fn header_key(&self) -> &DerivedKey {
        &self.header
    }

    pub fn verifier_key(&self) -> &DerivedKey {
        &self.verifier
    }

    /// Per-file chunk key: HKDF(master, "strata-chunk" ‖ file_id).
    pub fn chunk_key(&self, file_id: &[u8; ID_SIZE]) -> StrataResult<DerivedKey> {
        let mut info = Vec::with_capacity(INFO_CHUNK.len() + ID_SIZE);
        info.extend_from_slice(INFO_CHUNK);
        info.extend_from_slice(file_id);
        hkdf_derive(self.master.as_bytes(), &info)
    }
}

/// HKDF-SHA256 key derivation with a domain-specific info string.
fn hkdf_derive(ikm: &[u8; KEY_SIZE], info: &[u8]) -> StrataResult<DerivedKey> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(info, &mut okm)
        .map_err(|e| StrataError::Other(anyhow::anyhow!("HKDF expand failed: {e}")))?;
    Ok(DerivedKey::from_bytes(okm))
}
