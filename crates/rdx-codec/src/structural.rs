//! Splits a parsed file into a structural stream (schema-described leaves)
//! and a residual stream (every byte no kept leaf accounts for), and merges
//! them back.
//!
//! Structural stream layout, before block compression:
//!
//! ```text
//! u8      stream version
//! i32 LE  schema id
//! varint  residual length
//! varint  leaf count
//! per leaf:
//!   varint  residual bytes preceding the leaf
//!   varint  schema field reference (arena index + 1, 0 when unmapped)
//!   u8      tag: 0 integer, 1 text, 2 bytes
//!   integer: u8 width, zigzag varint value
//!   text / bytes: varint length, raw bytes
//! ```

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};
use rdx_core::types::SchemaId;
use rdx_core::{ByteBuffer, RdxError, Result};
use rdx_parser::{ParsedRepresentation, ParsedValue, ResolvedLeaf, Span};

use crate::varint;

pub const STREAM_VERSION: u8 = 1;

const TAG_INTEGER: u8 = 0;
const TAG_TEXT: u8 = 1;
const TAG_BYTES: u8 = 2;

/// Per-field counters collected while splitting one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldStats {
    pub kind: String,
    pub leaves: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct Split {
    /// Uncompressed structural stream.
    pub structural: ByteBuffer,
    /// Uncompressed residual stream.
    pub residual: ByteBuffer,
    pub leaves: usize,
    /// Original bytes carried by the structural stream.
    pub covered: usize,
    /// Keyed by schema path, or by the parsed name for unmapped leaves.
    pub field_stats: BTreeMap<String, FieldStats>,
}

/// Fields of the structural stream that precede the leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub version: u8,
    pub schema_id: SchemaId,
    pub residual_len: usize,
    pub leaf_count: usize,
}

struct Kept<'a> {
    span: Span,
    leaf: ResolvedLeaf<'a>,
}

/// A leaf is kept when its span lies inside `data` and its value renders
/// back to exactly the bytes under that span.
fn reproduces(leaf: &ResolvedLeaf<'_>, data: &[u8]) -> Option<Span> {
    let span = leaf.field.span?;
    if span.len == 0 {
        return None;
    }
    let original = data.get(span.offset..span.offset.checked_add(span.len)?)?;
    let rendered = leaf.field.value.render(span.len)?;
    (rendered == original).then_some(span)
}

pub fn split(rep: &ParsedRepresentation, schema_id: SchemaId, data: &[u8]) -> Split {
    let leaves = rep.leaves();
    let mut kept: Vec<Kept<'_>> = leaves
        .iter()
        .filter_map(|leaf| reproduces(leaf, data).map(|span| Kept { span, leaf: *leaf }))
        .collect();
    kept.sort_by_key(|k| k.span.offset);

    let mut body = ByteBuffer::new();
    let mut residual = ByteBuffer::with_capacity(data.len());
    let mut field_stats: BTreeMap<String, FieldStats> = BTreeMap::new();
    let mut cursor = 0usize;
    let mut count = 0usize;
    let mut dropped = 0usize;

    for k in &kept {
        if k.span.offset < cursor {
            dropped += 1;
            continue;
        }
        let mut value = ByteBuffer::new();
        match &k.leaf.field.value {
            ParsedValue::Integer(v) => {
                value.append_byte(TAG_INTEGER);
                value.append_byte(k.span.len as u8);
                varint::write_i64(&mut value, *v);
            }
            ParsedValue::Text(s) => {
                value.append_byte(TAG_TEXT);
                varint::write_u64(&mut value, s.len() as u64);
                value.append(s.as_bytes());
            }
            ParsedValue::Bytes(b) => {
                value.append_byte(TAG_BYTES);
                varint::write_u64(&mut value, b.len() as u64);
                value.append(b);
            }
            ParsedValue::Nested(_) => continue,
        }
        let gap = &data[cursor..k.span.offset];
        residual.append(gap);
        varint::write_u64(&mut body, gap.len() as u64);
        varint::write_u64(&mut body, k.leaf.schema_field.map_or(0, |id| id as u64 + 1));
        body.append(&value);
        cursor = k.span.end();
        count += 1;

        let key = match k.leaf.schema_field {
            Some(id) => rep.schema.path(id),
            None => k.leaf.field.name.clone(),
        };
        let stats = field_stats.entry(key).or_insert_with(|| FieldStats {
            kind: k.leaf.field.kind.to_string(),
            ..FieldStats::default()
        });
        stats.leaves += 1;
        stats.bytes += k.span.len as u64;
    }
    residual.append(&data[cursor..]);

    if dropped > 0 {
        tracing::debug!(dropped, "Overlapping leaves left to the residual stream");
    }

    let covered = data.len() - residual.len();
    let mut structural = ByteBuffer::with_capacity(body.len() + 16);
    structural.append_byte(STREAM_VERSION);
    let mut id = [0u8; 4];
    LittleEndian::write_i32(&mut id, schema_id);
    structural.append(&id);
    varint::write_u64(&mut structural, residual.len() as u64);
    varint::write_u64(&mut structural, count as u64);
    structural.append(&body);

    Split {
        structural,
        residual,
        leaves: count,
        covered,
        field_stats,
    }
}

/// Parse the stream header; returns it with the position of the first leaf.
pub fn read_header(structural: &[u8]) -> Result<(StreamHeader, usize)> {
    let version = *structural
        .first()
        .ok_or_else(|| RdxError::Codec("empty structural stream".into()))?;
    if version != STREAM_VERSION {
        return Err(RdxError::Codec(format!("unsupported structural stream version {version}")));
    }
    let id = structural
        .get(1..5)
        .ok_or_else(|| RdxError::Codec("truncated structural stream header".into()))?;
    let mut pos = 5;
    let residual_len = varint::read_len(structural, &mut pos)?;
    let leaf_count = varint::read_len(structural, &mut pos)?;
    Ok((
        StreamHeader {
            version,
            schema_id: LittleEndian::read_i32(id),
            residual_len,
            leaf_count,
        },
        pos,
    ))
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize, what: &str) -> Result<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| RdxError::Codec(format!("{what} runs past end of stream")))?;
    let out = &data[*pos..end];
    *pos = end;
    Ok(out)
}

/// Interleave residual gaps and leaf values. The result must be exactly
/// `original_size` bytes.
pub fn merge(structural: &[u8], residual: &[u8], original_size: usize) -> Result<ByteBuffer> {
    let (header, mut pos) = read_header(structural)?;
    if header.residual_len != residual.len() {
        return Err(RdxError::Codec(format!(
            "residual stream is {} bytes, header declares {}",
            residual.len(),
            header.residual_len
        )));
    }

    let mut out = ByteBuffer::with_capacity(original_size.min(1 << 24));
    let mut rpos = 0usize;
    for _ in 0..header.leaf_count {
        let gap = varint::read_len(structural, &mut pos)?;
        out.append(take(residual, &mut rpos, gap, "residual gap")?);
        let _field_ref = varint::read_u64(structural, &mut pos)?;
        let tag = take(structural, &mut pos, 1, "leaf tag")?[0];
        match tag {
            TAG_INTEGER => {
                let width = take(structural, &mut pos, 1, "integer width")?[0] as usize;
                let value = varint::read_i64(structural, &mut pos)?;
                if width > 8 {
                    return Err(RdxError::Codec(format!("integer width {width} exceeds 8")));
                }
                out.append(&value.to_le_bytes()[..width]);
            }
            TAG_TEXT | TAG_BYTES => {
                let len = varint::read_len(structural, &mut pos)?;
                out.append(take(structural, &mut pos, len, "leaf value")?);
            }
            other => return Err(RdxError::Codec(format!("unknown leaf tag {other}"))),
        }
        if out.len() > original_size {
            return Err(RdxError::Codec(format!(
                "reconstruction exceeds original size {original_size}"
            )));
        }
    }
    out.append(&residual[rpos..]);

    if pos != structural.len() {
        return Err(RdxError::Codec(format!(
            "{} trailing bytes in structural stream",
            structural.len() - pos
        )));
    }
    if out.len() != original_size {
        return Err(RdxError::Codec(format!(
            "reconstructed {} bytes, expected {original_size}",
            out.len()
        )));
    }
    Ok(out)
}
