//! Per-chunk XChaCha20-Poly1305 encryption/decryption
//!
//! Encrypted chunk body (binary):
//! ```text
//! [24 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! AAD = file_id (16 bytes) || index (4 bytes, BE) || chunk_count (4 bytes, BE)
//! ```
//!
//! The AAD binds each chunk to its file, position and file length, so a chunk
//! moved to another file or slot fails to decrypt.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use strata_core::{StrataError, StrataResult};

use crate::keys::DerivedKey;
use crate::{ID_SIZE, NONCE_SIZE, TAG_SIZE};

/// Size of the encrypted body for a plaintext of `plain_len` bytes.
pub const fn encrypted_body_size(plain_len: usize) -> usize {
    NONCE_SIZE + plain_len + TAG_SIZE
}

/// Encrypt a single chunk.
///
/// Returns: `[24-byte nonce][ciphertext][16-byte tag]`
pub fn encrypt_chunk(
    chunk_key: &DerivedKey,
    file_id: &[u8; ID_SIZE],
    index: u32,
    chunk_count: u32,
    plaintext: &[u8],
) -> StrataResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(chunk_key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let aad = build_aad(file_id, index, chunk_count);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|e| StrataError::Other(anyhow::anyhow!("chunk encryption failed: {e}")))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt a single chunk body produced by [`encrypt_chunk`].
///
/// Any tag or AAD mismatch is an integrity failure; no partial plaintext is
/// ever returned.
pub fn decrypt_chunk(
    chunk_key: &DerivedKey,
    file_id: &[u8; ID_SIZE],
    index: u32,
    chunk_count: u32,
    encrypted: &[u8],
) -> StrataResult<Vec<u8>> {
    if encrypted.len() < NONCE_SIZE + TAG_SIZE {
        return Err(StrataError::integrity(format!(
            "encrypted chunk too short: {} bytes (minimum {})",
            encrypted.len(),
            NONCE_SIZE + TAG_SIZE
        )));
    }

    let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(chunk_key.as_bytes().into());

    let aad = build_aad(file_id, index, chunk_count);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| {
            StrataError::integrity(format!(
                "chunk {index} failed authentication (wrong key, corrupted data, or moved chunk)"
            ))
        })
}

fn build_aad(file_id: &[u8; ID_SIZE], index: u32, chunk_count: u32) -> [u8; ID_SIZE + 8] {
    let mut aad = [0u8; ID_SIZE + 8];
    aad[..ID_SIZE].copy_from_slice(file_id);
    aad[ID_SIZE..ID_SIZE + 4].copy_from_slice(&index.to_be_bytes());
    aad[ID_SIZE + 4..].copy_from_slice(&chunk_count.to_be_bytes());
    aad
}
