use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use parking_lot::Mutex;
use rdx_core::{ByteBuffer, RdxError, Result};

use super::format::{ArchiveEntry, ArchiveHeader, BlockHeader, ARCHIVE_HEADER_LEN, BLOCK_HEADER_LEN};
use crate::decompress::DecompressionEngine;

/// Smallest possible encoded index entry (empty name).
const MIN_ENTRY_LEN: u64 = 52;

/// Random-access view of a finalized archive. The whole index is loaded on
/// open; blocks are read on demand.
pub struct ArchiveReader {
    path: PathBuf,
    file: Mutex<File>,
    header: ArchiveHeader,
    entries: Vec<ArchiveEntry>,
}

impl ArchiveReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| RdxError::io(path, e))?;
        let len = file.metadata().map_err(|e| RdxError::io(path, e))?.len();
        if len < ARCHIVE_HEADER_LEN {
            return Err(RdxError::Format(format!(
                "{}: {len} bytes is too short for an archive header",
                path.display()
            )));
        }
        let header = ArchiveHeader::read_from(&mut file)?;
        let index_offset = u64::try_from(header.index_offset)
            .ok()
            .filter(|&o| o >= ARCHIVE_HEADER_LEN && o + 4 <= len)
            .ok_or_else(|| {
                RdxError::Format(format!(
                    "{}: index offset {} outside file of {len} bytes",
                    path.display(),
                    header.index_offset
                ))
            })?;

        file.seek(SeekFrom::Start(index_offset))
            .map_err(|e| RdxError::io(path, e))?;
        let mut index = BufReader::new(&mut file);
        let count = index
            .read_u32::<LittleEndian>()
            .map_err(|e| RdxError::Format(format!("reading index count: {e}")))?;
        if u64::from(count) * MIN_ENTRY_LEN > len - index_offset - 4 {
            return Err(RdxError::Format(format!(
                "index declares {count} entries, more than the file can hold"
            )));
        }

        let mut entries = Vec::with_capacity(count as usize);
        for i in 0..count {
            let entry = ArchiveEntry::read_from(&mut index)?;
            validate_entry(&entry, index_offset)
                .map_err(|msg| RdxError::Format(format!("index entry {i} ({}): {msg}", entry.name)))?;
            entries.push(entry);
        }
        drop(index);

        tracing::debug!(path = %path.display(), entries = entries.len(), "Opened archive");
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            header,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    /// Index entries in insertion order.
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn list_entries(&self) -> Vec<ArchiveEntry> {
        self.entries.clone()
    }

    pub fn find(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// The compressed structural and residual streams of one entry. Only that
    /// entry's block is read.
    pub fn read_block(&self, entry: &ArchiveEntry) -> Result<(ByteBuffer, ByteBuffer)> {
        let io = |e: std::io::Error| RdxError::io(&self.path, e);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(entry.offset)).map_err(io)?;

        let block = BlockHeader::read_from(&mut *file)?;
        let indexed = BlockHeader {
            flags: block.flags,
            ..entry.block_header()
        };
        if block != indexed {
            return Err(RdxError::Format(format!(
                "{}: block header at {} disagrees with the index",
                entry.name, entry.offset
            )));
        }

        file.seek(SeekFrom::Start(entry.data_offset())).map_err(io)?;
        let mut structural = ByteBuffer::new();
        structural.resize(entry.structural_size as usize);
        file.read_exact(structural.as_mut_slice())
            .map_err(|e| RdxError::Format(format!("{}: truncated structural stream: {e}", entry.name)))?;
        let mut residual = ByteBuffer::new();
        residual.resize(entry.residual_size as usize);
        file.read_exact(residual.as_mut_slice())
            .map_err(|e| RdxError::Format(format!("{}: truncated residual stream: {e}", entry.name)))?;
        Ok((structural, residual))
    }

    pub fn extract_to_vec(&self, entry: &ArchiveEntry, engine: &DecompressionEngine) -> Result<Vec<u8>> {
        let (structural, residual) = self.read_block(entry)?;
        engine.decompress(entry, &structural, &residual).map(ByteBuffer::into_vec)
    }

    pub fn extract_entry(
        &self,
        entry: &ArchiveEntry,
        output: &Path,
        engine: &DecompressionEngine,
    ) -> Result<()> {
        let (structural, residual) = self.read_block(entry)?;
        engine.decompress_to_file(entry, &structural, &residual, output)?;
        tracing::debug!(entry = %entry.name, output = %output.display(), "Extracted entry");
        Ok(())
    }
}

fn validate_entry(entry: &ArchiveEntry, index_offset: u64) -> std::result::Result<(), String> {
    let expected = BLOCK_HEADER_LEN
        .checked_add(entry.structural_size)
        .and_then(|s| s.checked_add(entry.residual_size))
        .ok_or("stream sizes overflow")?;
    if entry.block_size != expected {
        return Err(format!(
            "block size {} does not match header plus streams ({expected})",
            entry.block_size
        ));
    }
    if entry.offset < ARCHIVE_HEADER_LEN {
        return Err(format!("block offset {} overlaps the archive header", entry.offset));
    }
    match entry.offset.checked_add(entry.block_size) {
        Some(end) if end <= index_offset => Ok(()),
        _ => Err(format!(
            "block {}+{} runs past the index at {index_offset}",
            entry.offset, entry.block_size
        )),
    }
}
