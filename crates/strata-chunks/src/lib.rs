//! strata-chunks: fixed-size chunking and content fingerprints
//!
//! # Overview
//! - `fingerprint`: BLAKE3 hashing of chunks, hex encoding
//! - `fixed`: deterministic fixed-size splitting and strict-order reassembly

pub mod fingerprint;
pub mod fixed;

pub use fingerprint::{fingerprint, fingerprint_chunks, hash_from_hex, hash_to_hex, Hash};
pub use fixed::{chunk_count, reassemble, split, Chunk};
