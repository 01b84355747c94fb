//! Sealed blobs: the on-disk and exported form of the file registry
//!
//! ```text
//! magic "SREG" (4) ‖ version (1) ‖ vault_id (16) ‖ nonce (24) ‖ ciphertext ‖ tag (16)
//! AAD = magic ‖ version ‖ vault_id
//! ```
//!
//! The vault id stays in the clear so backups can be matched to a vault
//! before any password is entered.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use strata_core::{StrataError, StrataResult};

use crate::keys::DerivedKey;
use crate::{ID_SIZE, NONCE_SIZE, TAG_SIZE};

const BLOB_MAGIC: &[u8; 4] = b"SREG";
const BLOB_VERSION: u8 = 1;
const PREFIX_LEN: usize = 4 + 1 + ID_SIZE;

pub fn seal_blob(key: &DerivedKey, vault_id: &[u8; ID_SIZE], plaintext: &[u8]) -> StrataResult<Vec<u8>> {
    let mut prefix = [0u8; PREFIX_LEN];
    prefix[..4].copy_from_slice(BLOB_MAGIC);
    prefix[4] = BLOB_VERSION;
    prefix[5..].copy_from_slice(vault_id);

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: &prefix,
            },
        )
        .map_err(|e| StrataError::Other(anyhow::anyhow!("blob encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(PREFIX_LEN + NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&prefix);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Read the clear-text vault id of a sealed blob without decrypting it.
pub fn peek_blob_vault_id(data: &[u8]) -> StrataResult<[u8; ID_SIZE]> {
    if data.len() < PREFIX_LEN + NONCE_SIZE + TAG_SIZE {
        return Err(StrataError::integrity("sealed blob too short"));
    }
    if &data[..4] != BLOB_MAGIC {
        return Err(StrataError::integrity("not a strata registry blob (bad magic)"));
    }
    if data[4] != BLOB_VERSION {
        return Err(StrataError::integrity(format!(
            "unsupported registry blob version {}",
            data[4]
        )));
    }
    let mut id = [0u8; ID_SIZE];
    id.copy_from_slice(&data[5..PREFIX_LEN]);
    Ok(id)
}

/// Decrypt a sealed blob, requiring it to belong to `vault_id`.
pub fn open_blob(key: &DerivedKey, vault_id: &[u8; ID_SIZE], data: &[u8]) -> StrataResult<Vec<u8>> {
    let blob_vault = peek_blob_vault_id(data)?;
    if &blob_vault != vault_id {
        return Err(StrataError::integrity("registry blob belongs to a different vault"));
    }
    let (prefix, rest) = data.split_at(PREFIX_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: prefix,
            },
        )
        .map_err(|_| StrataError::integrity("registry blob failed authentication"))
}
