//! Content hashing and chunk fingerprints.

use sha2::{Digest, Sha256};

const FNV_OFFSET_BASIS: u64 = 14_695_981_039_346_656_037;
const FNV_PRIME: u64 = 1_099_511_628_211;

/// Lowercase hex SHA-256, 64 characters.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Whole-file dedup key.
pub fn content_hash(data: &[u8]) -> String {
    sha256_hex(data)
}

/// Hash of a path string, so the corpus never stores raw paths.
pub fn path_hash(path: &str) -> String {
    sha256_hex(path.as_bytes())
}

/// 64-bit FNV-1a over a chunk. Cheap pre-filter only; equality needs the strong hash.
pub fn chunk_fingerprint(data: &[u8]) -> u64 {
    data.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Fixed-size chunk boundaries as `(offset, len)`; the last chunk may be short.
pub fn chunk_spans(total_len: usize, chunk_size: usize) -> Vec<(usize, usize)> {
    if chunk_size == 0 {
        return Vec::new();
    }
    (0..total_len)
        .step_by(chunk_size)
        .map(|offset| (offset, chunk_size.min(total_len - offset)))
        .collect()
}
