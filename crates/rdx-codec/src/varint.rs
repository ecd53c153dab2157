//! LEB128 varints with zigzag for signed values.

use rdx_core::{ByteBuffer, RdxError, Result};

pub fn write_u64(buf: &mut ByteBuffer, mut v: u64) {
    while v >= 0x80 {
        buf.append_byte((v as u8) | 0x80);
        v >>= 7;
    }
    buf.append_byte(v as u8);
}

pub fn write_i64(buf: &mut ByteBuffer, v: i64) {
    write_u64(buf, zigzag(v));
}

pub fn read_u64(data: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        let Some(&b) = data.get(*pos) else {
            return Err(RdxError::Codec(format!("truncated varint at {}", *pos)));
        };
        *pos += 1;
        value |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(RdxError::Codec(format!("varint overflow at {}", *pos)))
}

pub fn read_i64(data: &[u8], pos: &mut usize) -> Result<i64> {
    read_u64(data, pos).map(unzigzag)
}

/// Varint that must fit a `usize` length.
pub fn read_len(data: &[u8], pos: &mut usize) -> Result<usize> {
    let v = read_u64(data, pos)?;
    usize::try_from(v).map_err(|_| RdxError::Codec(format!("length {v} out of range")))
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}
