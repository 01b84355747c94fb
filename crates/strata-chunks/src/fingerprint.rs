//! BLAKE3 content fingerprints
//!
//! Each plaintext chunk carries its BLAKE3 hash in the registry and in the
//! chunk header; it is re-checked after decryption.

use anyhow::Result;
use rayon::prelude::*;

use crate::fixed::Chunk;

/// A BLAKE3 hash digest (32 bytes), displayed as 64 hex chars
pub type Hash = blake3::Hash;

pub fn fingerprint(data: &[u8]) -> Hash {
    blake3::hash(data)
}

/// Fingerprint every chunk of `data` in parallel, in chunk order.
pub fn fingerprint_chunks(data: &[u8], chunks: &[Chunk]) -> Vec<Hash> {
    chunks
        .par_iter()
        .map(|c| fingerprint(c.slice(data)))
        .collect()
}

/// Format a hash as lowercase hex string (64 chars)
pub fn hash_to_hex(hash: &Hash) -> String {
    hash.to_hex().to_string()
}

/// Parse a 64-char hex string into a Hash
pub fn hash_from_hex(hex: &str) -> Result<Hash> {
    blake3::Hash::from_hex(hex).map_err(|e| anyhow::anyhow!("invalid BLAKE3 hex '{hex}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::split;
    use proptest::prelude::*;

    #[test]
    fn hash_hex_roundtrip() {
        let h = fingerprint(b"hello strata");
        let hex = hash_to_hex(&h);
        assert_eq!(hex.len(), 64);
        assert_eq!(hash_from_hex(&hex).unwrap(), h);
        assert!(hash_from_hex("zz").is_err());
    }

    proptest! {
        #[test]
        fn parallel_fingerprints_match_sequential(
            data in proptest::collection::vec(any::<u8>(), 0..=8192),
            size in 1usize..=1024,
        ) {
            let chunks = split(data.len(), size);
            let par = fingerprint_chunks(&data, &chunks);
            let seq: Vec<Hash> = chunks.iter().map(|c| fingerprint(c.slice(&data))).collect();
            prop_assert_eq!(par, seq);
        }
    }
}
