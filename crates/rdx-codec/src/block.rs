//! General-purpose block compression for the structural and residual streams.

use std::io::Read;

use rdx_core::{ByteBuffer, RdxError, Result};

pub fn compress(data: &[u8], level: i32) -> Result<ByteBuffer> {
    zstd::encode_all(data, level)
        .map(ByteBuffer::from)
        .map_err(|e| RdxError::Codec(format!("zstd compression failed: {e}")))
}

pub fn decompress(data: &[u8]) -> Result<ByteBuffer> {
    zstd::decode_all(data)
        .map(ByteBuffer::from)
        .map_err(|e| RdxError::Codec(format!("zstd decompression failed: {e}")))
}

/// Decompress a frame that must expand to exactly `expected` bytes.
/// Reading stops one byte past `expected` so an oversized frame is caught
/// without inflating all of it.
pub fn decompress_exact(data: &[u8], expected: usize) -> Result<ByteBuffer> {
    let decoder = zstd::Decoder::new(data)
        .map_err(|e| RdxError::Codec(format!("zstd decoder init failed: {e}")))?;
    let mut out = Vec::with_capacity(expected.min(1 << 24));
    decoder
        .take(expected as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| RdxError::Codec(format!("zstd decompression failed: {e}")))?;
    if out.len() != expected {
        return Err(RdxError::Codec(format!(
            "decompressed size mismatch: expected {expected} bytes, got {}{}",
            out.len(),
            if out.len() > expected { "+" } else { "" }
        )));
    }
    Ok(ByteBuffer::from(out))
}
