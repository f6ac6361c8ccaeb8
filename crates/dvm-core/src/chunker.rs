//! Canonical chunking: the split/verify/reassemble recipe that defines a
//! file's content address. Any deviation from `CHUNK_SIZE` or the hashing
//! scheme below produces a different `FileHash` for the same bytes, so this
//! module has no configuration knobs beyond the constant itself.

use sha2::{Digest, Sha256};

use crate::error::{DvmError, Result};

/// Fixed chunk size in bytes. Changing this changes content addresses.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// A single piece of a file, as produced by [`split`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    pub total: u32,
    pub bytes: Vec<u8>,
    pub chunk_hash: String,
}

impl Chunk {
    fn new(index: u32, total: u32, bytes: Vec<u8>) -> Self {
        let chunk_hash = hash_hex(&bytes);
        Self {
            index,
            total,
            bytes,
            chunk_hash,
        }
    }
}

/// Lowercase hex SHA-256 of `data`.
pub fn hash_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Splits `bytes` into consecutive `CHUNK_SIZE` slices, index 0 first.
/// Returns an empty `Vec` only when `bytes` is empty.
pub fn split(bytes: &[u8]) -> Vec<Chunk> {
    if bytes.is_empty() {
        return Vec::new();
    }

    let total = bytes.len().div_ceil(CHUNK_SIZE) as u32;
    bytes
        .chunks(CHUNK_SIZE)
        .enumerate()
        .map(|(i, slice)| Chunk::new(i as u32, total, slice.to_vec()))
        .collect()
}

/// Sorts `chunks` by index, verifies every chunk hash and the whole-file
/// hash against `expected_file_hash`, then returns the reassembled bytes.
///
/// Fails with [`DvmError::IntegrityFailed`] on a duplicate index, a missing
/// index, a chunk hash mismatch, or a file hash mismatch.
pub fn verify_and_assemble(mut chunks: Vec<Chunk>, expected_file_hash: &str) -> Result<Vec<u8>> {
    chunks.sort_by_key(|c| c.index);

    for (i, chunk) in chunks.iter().enumerate() {
        if chunk.index != i as u32 {
            return Err(DvmError::IntegrityFailed(format!(
                "duplicate or missing chunk index: expected {i}, got {}",
                chunk.index
            )));
        }
        let actual = hash_hex(&chunk.bytes);
        if actual != chunk.chunk_hash {
            return Err(DvmError::IntegrityFailed(format!(
                "chunk {i} hash mismatch: expected {}, computed {actual}",
                chunk.chunk_hash
            )));
        }
    }

    let mut assembled = Vec::with_capacity(chunks.iter().map(|c| c.bytes.len()).sum());
    for chunk in &chunks {
        assembled.extend_from_slice(&chunk.bytes);
    }

    let actual_file_hash = hash_hex(&assembled);
    if actual_file_hash != expected_file_hash {
        return Err(DvmError::IntegrityFailed(format!(
            "file hash mismatch: expected {expected_file_hash}, computed {actual_file_hash}"
        )));
    }

    Ok(assembled)
}
