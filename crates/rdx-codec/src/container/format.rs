//! On-disk layout of an RDX archive. All integers are little-endian.
//!
//! ```text
//! header   magic u32 | version u16 | flags u16 | index offset i64
//! block*   magic u32 | header len u32 | schema i32 | file type i32
//!          | original i64 | structural i64 | residual i64 | flags u16
//!          | structural bytes | residual bytes
//! index    count u32, then per entry:
//!          name len u32 | name | original i64 | structural i64 | residual i64
//!          | schema i32 | file type i32 | block offset i64 | block size i64
//! ```

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rdx_core::types::{FileTypeId, SchemaId};
use rdx_core::{RdxError, Result};

pub const ARCHIVE_MAGIC: u32 = 0x5244_5801;
pub const FORMAT_VERSION: u16 = 1;
pub const BLOCK_MAGIC: u32 = 0x424C_4B01;

pub const ARCHIVE_HEADER_LEN: u64 = 16;
pub const BLOCK_HEADER_LEN: u64 = 42;
/// Byte position of the index offset field inside the header.
pub const INDEX_OFFSET_POS: u64 = 8;

/// Longest entry name accepted when reading an index.
const MAX_NAME_LEN: u32 = 64 * 1024;

fn io_err(what: &str) -> impl FnOnce(std::io::Error) -> RdxError + '_ {
    move |e| RdxError::Format(format!("{what}: {e}"))
}

fn non_negative(v: i64, what: &str) -> Result<u64> {
    u64::try_from(v).map_err(|_| RdxError::Format(format!("negative {what}: {v}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub version: u16,
    pub flags: u16,
    pub index_offset: i64,
}

impl ArchiveHeader {
    pub fn new() -> Self {
        Self {
            version: FORMAT_VERSION,
            flags: 0,
            index_offset: 0,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(ARCHIVE_MAGIC)?;
        w.write_u16::<LittleEndian>(self.version)?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_i64::<LittleEndian>(self.index_offset)
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let magic = r
            .read_u32::<LittleEndian>()
            .map_err(io_err("reading archive header"))?;
        if magic != ARCHIVE_MAGIC {
            return Err(RdxError::Format(format!(
                "bad archive magic {magic:#010x}, expected {ARCHIVE_MAGIC:#010x}"
            )));
        }
        let version = r.read_u16::<LittleEndian>().map_err(io_err("reading archive header"))?;
        if version != FORMAT_VERSION {
            return Err(RdxError::Format(format!("unsupported archive version {version}")));
        }
        let flags = r.read_u16::<LittleEndian>().map_err(io_err("reading archive header"))?;
        let index_offset = r.read_i64::<LittleEndian>().map_err(io_err("reading archive header"))?;
        Ok(Self {
            version,
            flags,
            index_offset,
        })
    }
}

impl Default for ArchiveHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub schema_id: SchemaId,
    pub file_type_id: FileTypeId,
    pub original_size: u64,
    pub structural_size: u64,
    pub residual_size: u64,
    pub flags: u16,
}

impl BlockHeader {
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(BLOCK_MAGIC)?;
        w.write_u32::<LittleEndian>(BLOCK_HEADER_LEN as u32)?;
        w.write_i32::<LittleEndian>(self.schema_id)?;
        w.write_i32::<LittleEndian>(self.file_type_id)?;
        w.write_i64::<LittleEndian>(self.original_size as i64)?;
        w.write_i64::<LittleEndian>(self.structural_size as i64)?;
        w.write_i64::<LittleEndian>(self.residual_size as i64)?;
        w.write_u16::<LittleEndian>(self.flags)
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let magic = r.read_u32::<LittleEndian>().map_err(io_err("reading block header"))?;
        if magic != BLOCK_MAGIC {
            return Err(RdxError::Format(format!("bad block magic {magic:#010x}")));
        }
        let header_len = r.read_u32::<LittleEndian>().map_err(io_err("reading block header"))?;
        if u64::from(header_len) != BLOCK_HEADER_LEN {
            return Err(RdxError::Format(format!("unexpected block header length {header_len}")));
        }
        let schema_id = r.read_i32::<LittleEndian>().map_err(io_err("reading block header"))?;
        let file_type_id = r.read_i32::<LittleEndian>().map_err(io_err("reading block header"))?;
        let original = r.read_i64::<LittleEndian>().map_err(io_err("reading block header"))?;
        let structural = r.read_i64::<LittleEndian>().map_err(io_err("reading block header"))?;
        let residual = r.read_i64::<LittleEndian>().map_err(io_err("reading block header"))?;
        let flags = r.read_u16::<LittleEndian>().map_err(io_err("reading block header"))?;
        Ok(Self {
            schema_id,
            file_type_id,
            original_size: non_negative(original, "original size")?,
            structural_size: non_negative(structural, "structural size")?,
            residual_size: non_negative(residual, "residual size")?,
            flags,
        })
    }
}

/// One index entry: where a file's block lives and what it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub original_size: u64,
    pub structural_size: u64,
    pub residual_size: u64,
    pub schema_id: SchemaId,
    pub file_type_id: FileTypeId,
    pub offset: u64,
    pub block_size: u64,
}

impl ArchiveEntry {
    /// Position of the structural stream.
    pub fn data_offset(&self) -> u64 {
        self.offset + BLOCK_HEADER_LEN
    }

    pub fn block_header(&self) -> BlockHeader {
        BlockHeader {
            schema_id: self.schema_id,
            file_type_id: self.file_type_id,
            original_size: self.original_size,
            structural_size: self.structural_size,
            residual_size: self.residual_size,
            flags: 0,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(self.name.len() as u32)?;
        w.write_all(self.name.as_bytes())?;
        w.write_i64::<LittleEndian>(self.original_size as i64)?;
        w.write_i64::<LittleEndian>(self.structural_size as i64)?;
        w.write_i64::<LittleEndian>(self.residual_size as i64)?;
        w.write_i32::<LittleEndian>(self.schema_id)?;
        w.write_i32::<LittleEndian>(self.file_type_id)?;
        w.write_i64::<LittleEndian>(self.offset as i64)?;
        w.write_i64::<LittleEndian>(self.block_size as i64)
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let name_len = r.read_u32::<LittleEndian>().map_err(io_err("reading index entry"))?;
        if name_len > MAX_NAME_LEN {
            return Err(RdxError::Format(format!("entry name length {name_len} too large")));
        }
        let mut name = vec![0u8; name_len as usize];
        r.read_exact(&mut name).map_err(io_err("reading index entry"))?;
        let name = String::from_utf8(name)
            .map_err(|e| RdxError::Format(format!("entry name is not UTF-8: {e}")))?;
        let original = r.read_i64::<LittleEndian>().map_err(io_err("reading index entry"))?;
        let structural = r.read_i64::<LittleEndian>().map_err(io_err("reading index entry"))?;
        let residual = r.read_i64::<LittleEndian>().map_err(io_err("reading index entry"))?;
        let schema_id = r.read_i32::<LittleEndian>().map_err(io_err("reading index entry"))?;
        let file_type_id = r.read_i32::<LittleEndian>().map_err(io_err("reading index entry"))?;
        let offset = r.read_i64::<LittleEndian>().map_err(io_err("reading index entry"))?;
        let block_size = r.read_i64::<LittleEndian>().map_err(io_err("reading index entry"))?;
        Ok(Self {
            name,
            original_size: non_negative(original, "original size")?,
            structural_size: non_negative(structural, "structural size")?,
            residual_size: non_negative(residual, "residual size")?,
            schema_id,
            file_type_id,
            offset: non_negative(offset, "block offset")?,
            block_size: non_negative(block_size, "block size")?,
        })
    }
}
