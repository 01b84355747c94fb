//! Fixed-size encrypted chunk header
//!
//! Every stored object starts with this header so that a scan can recover
//! which file and slot a chunk belongs to without the registry.
//!
//! ```text
//! magic "STRC" (4) ‖ version (1) ‖ nonce (24) ‖ AEAD(payload, 298) ‖ tag (16)
//! AAD = magic ‖ version
//!
//! payload (big-endian):
//!   file_id (16) ‖ index u32 ‖ chunk_count u32 ‖ file_size u64 ‖
//!   created_at u64 ‖ content_fingerprint (32) ‖ name_len u16 ‖ name (224, zero padded)
//! ```

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use strata_core::{StrataError, StrataResult};

use crate::keys::DerivedKey;
use crate::{ID_SIZE, NONCE_SIZE, TAG_SIZE};

pub const HEADER_MAGIC: &[u8; 4] = b"STRC";
pub const HEADER_VERSION: u8 = 1;

/// Bytes reserved for the UTF-8 file name
pub const NAME_FIELD_LEN: usize = 224;

const PAYLOAD_LEN: usize = ID_SIZE + 4 + 4 + 8 + 8 + 32 + 2 + NAME_FIELD_LEN;
const PREFIX_LEN: usize = HEADER_MAGIC.len() + 1;

/// Total encoded header length
pub const HEADER_LEN: usize = PREFIX_LEN + NONCE_SIZE + PAYLOAD_LEN + TAG_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub file_id: [u8; ID_SIZE],
    pub index: u32,
    pub chunk_count: u32,
    pub file_size: u64,
    pub created_at: u64,
    /// BLAKE3 of the plaintext chunk
    pub content_fingerprint: [u8; 32],
    /// Original file name, truncated to [`NAME_FIELD_LEN`] bytes
    pub name: String,
}

impl ChunkHeader {
    /// Encrypt and frame the header.
    pub fn seal(&self, header_key: &DerivedKey) -> StrataResult<Vec<u8>> {
        let payload = self.encode_payload();

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let prefix = prefix(HEADER_VERSION);

        let cipher = XChaCha20Poly1305::new(header_key.as_bytes().into());
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &payload,
                    aad: &prefix,
                },
            )
            .map_err(|e| StrataError::Other(anyhow::anyhow!("header encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(&prefix);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        debug_assert_eq!(out.len(), HEADER_LEN);
        Ok(out)
    }

    /// Parse and decrypt a header from the first [`HEADER_LEN`] bytes of `data`.
    pub fn open(header_key: &DerivedKey, data: &[u8]) -> StrataResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(StrataError::integrity(format!(
                "chunk header too short: {} bytes (expected {HEADER_LEN})",
                data.len()
            )));
        }
        if &data[..HEADER_MAGIC.len()] != HEADER_MAGIC {
            return Err(StrataError::integrity("not a strata chunk (bad magic)"));
        }
        let version = data[HEADER_MAGIC.len()];
        if version != HEADER_VERSION {
            return Err(StrataError::integrity(format!(
                "unsupported chunk header version {version}"
            )));
        }

        let nonce = XNonce::from_slice(&data[PREFIX_LEN..PREFIX_LEN + NONCE_SIZE]);
        let sealed = &data[PREFIX_LEN + NONCE_SIZE..HEADER_LEN];
        let cipher = XChaCha20Poly1305::new(header_key.as_bytes().into());
        let payload = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: sealed,
                    aad: &data[..PREFIX_LEN],
                },
            )
            .map_err(|_| StrataError::integrity("chunk header failed authentication"))?;

        Self::decode_payload(&payload)
    }

    fn encode_payload(&self) -> Vec<u8> {
        let name = truncate_name(&self.name);
        let mut buf = Vec::with_capacity(PAYLOAD_LEN);
        buf.extend_from_slice(&self.file_id);
        buf.extend_from_slice(&self.index.to_be_bytes());
        buf.extend_from_slice(&self.chunk_count.to_be_bytes());
        buf.extend_from_slice(&self.file_size.to_be_bytes());
        buf.extend_from_slice(&self.created_at.to_be_bytes());
        buf.extend_from_slice(&self.content_fingerprint);
        buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.resize(PAYLOAD_LEN, 0);
        buf
    }

    fn decode_payload(p: &[u8]) -> StrataResult<Self> {
        if p.len() != PAYLOAD_LEN {
            return Err(StrataError::integrity("chunk header payload has wrong length"));
        }
        let mut r = Reader { buf: p, pos: 0 };
        let file_id = r.array::<ID_SIZE>();
        let index = u32::from_be_bytes(r.array());
        let chunk_count = u32::from_be_bytes(r.array());
        let file_size = u64::from_be_bytes(r.array());
        let created_at = u64::from_be_bytes(r.array());
        let content_fingerprint = r.array::<32>();
        let name_len = u16::from_be_bytes(r.array()) as usize;
        if name_len > NAME_FIELD_LEN {
            return Err(StrataError::integrity("chunk header name length out of range"));
        }
        let name = std::str::from_utf8(&r.rest()[..name_len])
            .map_err(|_| StrataError::integrity("chunk header name is not UTF-8"))?
            .to_string();

        if chunk_count == 0 || index >= chunk_count {
            return Err(StrataError::integrity(format!(
                "chunk header index {index} out of range for {chunk_count} chunks"
            )));
        }

        Ok(Self {
            file_id,
            index,
            chunk_count,
            file_size,
            created_at,
            content_fingerprint,
            name,
        })
    }
}

fn prefix(version: u8) -> [u8; PREFIX_LEN] {
    let mut p = [0u8; PREFIX_LEN];
    p[..HEADER_MAGIC.len()].copy_from_slice(HEADER_MAGIC);
    p[HEADER_MAGIC.len()] = version;
    p
}

/// Longest prefix of `name` that fits the name field without splitting a character.
pub fn truncate_name(name: &str) -> &str {
    if name.len() <= NAME_FIELD_LEN {
        return name;
    }
    let mut end = NAME_FIELD_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    // callers only read fixed offsets inside a length-checked payload
    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn rest(&self) -> &[u8] {
        &self.buf[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::MasterKey;
    use crate::keys::KeyRing;

    fn header_key(seed: u8) -> DerivedKey {
        KeyRing::new(MasterKey::from_bytes([seed; 32]))
            .unwrap()
            .header_key()
            .clone()
    }

    fn sample(name: &str) -> ChunkHeader {
        ChunkHeader {
            file_id: [0x11; ID_SIZE],
            index: 2,
            chunk_count: 3,
            file_size: 10 * 1024 * 1024,
            created_at: 1_700_000_000,
            content_fingerprint: [0xEE; 32],
            name: name.to_string(),
        }
    }

    #[test]
    fn test_header_len() {
        assert_eq!(PAYLOAD_LEN, 298);
        assert_eq!(HEADER_LEN, 343);
    }

    #[test]
    fn test_seal_open() {
        let key = header_key(1);
        let header = sample("report.pdf");
        let sealed = header.seal(&key).unwrap();
        assert_eq!(sealed.len(), HEADER_LEN);
        assert_eq!(&sealed[..4], b"STRC");

        let mut object = sealed.clone();
        object.extend_from_slice(b"trailing body bytes");
        assert_eq!(ChunkHeader::open(&key, &object).unwrap(), header);
    }

    #[test]
    fn test_wrong_key_is_integrity_error() {
        let sealed = sample("a").seal(&header_key(1)).unwrap();
        assert!(matches!(
            ChunkHeader::open(&header_key(2), &sealed),
            Err(StrataError::Integrity(_))
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut sealed = sample("a").seal(&header_key(1)).unwrap();
        sealed[4] = 2;
        let err = ChunkHeader::open(&header_key(1), &sealed).unwrap_err();
        assert!(err.to_string().contains("version 2"));
    }

    #[test]
    fn test_foreign_object_rejected() {
        let junk = vec![0u8; HEADER_LEN];
        assert!(ChunkHeader::open(&header_key(1), &junk).is_err());
        assert!(ChunkHeader::open(&header_key(1), b"STRC").is_err());
    }

    #[test]
    fn test_long_name_truncated_on_char_boundary() {
        let name = "é".repeat(200); // 400 bytes
        let key = header_key(1);
        let opened = ChunkHeader::open(&key, &sample(&name).seal(&key).unwrap()).unwrap();
        assert_eq!(opened.name.len(), NAME_FIELD_LEN);
        assert_eq!(opened.name, "é".repeat(112));

        let odd = format!("a{}", "é".repeat(200));
        assert_eq!(truncate_name(&odd).len(), NAME_FIELD_LEN - 1);
    }
}
