//! Fixed-size chunking
//!
//! Boundaries depend only on the input length and the configured chunk size,
//! so a file always splits the same way. Empty input yields exactly one
//! zero-length chunk.

use strata_core::{StrataError, StrataResult};

/// A byte range of the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    /// Byte offset within the source file
    pub offset: u64,
    /// Chunk length in bytes
    pub length: usize,
}

impl Chunk {
    pub fn slice<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let start = self.offset as usize;
        &data[start..start + self.length]
    }
}

/// Number of chunks a file of `len` bytes splits into (never zero).
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    assert!(chunk_size > 0, "chunk_size must be > 0");
    len.div_ceil(chunk_size).max(1)
}

/// Split `len` bytes into ordered ranges of `chunk_size`; the last may be shorter.
pub fn split(len: usize, chunk_size: usize) -> Vec<Chunk> {
    let count = chunk_count(len, chunk_size);
    (0..count)
        .map(|i| {
            let offset = i * chunk_size;
            Chunk {
                index: i as u32,
                offset: offset as u64,
                length: chunk_size.min(len - offset),
            }
        })
        .collect()
}

/// Concatenate chunk payloads strictly by index.
///
/// `parts` may arrive in any order. Fails with `MissingChunk` for the first
/// absent index in `0..chunk_count`; duplicates or out-of-range indices are
/// integrity failures.
pub fn reassemble(chunk_count: u32, mut parts: Vec<(u32, Vec<u8>)>) -> StrataResult<Vec<u8>> {
    if chunk_count == 0 {
        return Err(StrataError::integrity("chunk_count must be at least 1"));
    }
    parts.sort_by_key(|(index, _)| *index);

    let mut out = Vec::with_capacity(parts.iter().map(|(_, p)| p.len()).sum());
    let mut expected = 0u32;
    for (index, payload) in parts {
        if index >= chunk_count {
            return Err(StrataError::integrity(format!(
                "chunk index {index} out of range for {chunk_count} chunks"
            )));
        }
        if index < expected {
            return Err(StrataError::integrity(format!("duplicate chunk index {index}")));
        }
        if index > expected {
            return Err(StrataError::MissingChunk { index: expected });
        }
        out.extend_from_slice(&payload);
        expected += 1;
    }
    if expected < chunk_count {
        return Err(StrataError::MissingChunk { index: expected });
    }
    Ok(out)
}
