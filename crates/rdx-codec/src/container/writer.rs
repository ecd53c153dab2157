use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use byteorder::{LittleEndian, WriteBytesExt};
use rdx_core::{RdxError, Result};

use super::format::{
    ArchiveEntry, ArchiveHeader, ARCHIVE_HEADER_LEN, BLOCK_HEADER_LEN, INDEX_OFFSET_POS,
};
use crate::engine::{CompressedFile, CompressionEngine};

/// Streams blocks into a new archive. The index stays in memory until
/// [`finalize`](Self::finalize); dropping an unfinalized writer finalizes it.
pub struct ArchiveWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    entries: Vec<ArchiveEntry>,
    pos: u64,
}

impl ArchiveWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| RdxError::io(path, e))?;
        let mut out = BufWriter::new(file);
        ArchiveHeader::new()
            .write_to(&mut out)
            .map_err(|e| RdxError::io(path, e))?;
        tracing::debug!(path = %path.display(), "Created archive");
        Ok(Self {
            path: path.to_path_buf(),
            out: Some(out),
            entries: Vec::new(),
            pos: ARCHIVE_HEADER_LEN,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Compress `path` and append its block. `name` overrides the stored
    /// entry name, which defaults to the file name.
    pub fn add_file(
        &mut self,
        path: &Path,
        engine: &CompressionEngine,
        name: Option<&str>,
    ) -> Result<ArchiveEntry> {
        self.add_file_cancellable(path, engine, name, &AtomicBool::new(false))
    }

    /// As [`add_file`](Self::add_file), checking `cancel` before compressing.
    /// A cancelled file leaves no trace in the archive or the corpus store;
    /// once compressed, a file is always appended so the two stay in step.
    pub fn add_file_cancellable(
        &mut self,
        path: &Path,
        engine: &CompressionEngine,
        name: Option<&str>,
        cancel: &AtomicBool,
    ) -> Result<ArchiveEntry> {
        let name = match name {
            Some(n) => n.to_string(),
            None => default_name(path),
        };
        check_cancel(cancel, &name)?;
        let compressed = engine.compress_file(path)?;
        self.write_block(&name, &compressed)
    }

    /// Append an already compressed file.
    pub fn append(&mut self, name: &str, compressed: &CompressedFile) -> Result<ArchiveEntry> {
        self.write_block(name, compressed)
    }

    fn write_block(&mut self, name: &str, compressed: &CompressedFile) -> Result<ArchiveEntry> {
        let start = self.pos;
        let entry = ArchiveEntry {
            name: name.to_string(),
            original_size: compressed.result.original_size,
            structural_size: compressed.structural.len() as u64,
            residual_size: compressed.residual.len() as u64,
            schema_id: compressed.result.schema_id,
            file_type_id: compressed.result.file_type_id,
            offset: start,
            block_size: BLOCK_HEADER_LEN
                + compressed.structural.len() as u64
                + compressed.residual.len() as u64,
        };

        let written = self.write_block_bytes(&entry, compressed);
        if let Err(e) = written {
            tracing::warn!(entry = %name, error = %e, "Block write failed, rolling back");
            self.rollback(start)?;
            return Err(e);
        }
        self.pos = start + entry.block_size;
        tracing::debug!(
            entry = %name,
            offset = entry.offset,
            size = entry.block_size,
            "Wrote block"
        );
        self.entries.push(entry.clone());
        Ok(entry)
    }

    fn write_block_bytes(&mut self, entry: &ArchiveEntry, compressed: &CompressedFile) -> Result<()> {
        let path = self.path.clone();
        let out = self.writer()?;
        let io = |e: std::io::Error| RdxError::io(&path, e);
        entry.block_header().write_to(out).map_err(io)?;
        out.write_all(&compressed.structural).map_err(io)?;
        out.write_all(&compressed.residual).map_err(io)?;
        Ok(())
    }

    /// Drop everything written after `start`.
    fn rollback(&mut self, start: u64) -> Result<()> {
        let path = self.path.clone();
        let out = self.writer()?;
        let result = (|| -> std::io::Result<()> {
            out.flush()?;
            out.get_ref().set_len(start)?;
            out.seek(SeekFrom::Start(start))?;
            Ok(())
        })();
        result.map_err(|e| RdxError::io(path, e))?;
        self.pos = start;
        Ok(())
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        self.out
            .as_mut()
            .ok_or_else(|| RdxError::Format("archive writer already finalized".into()))
    }

    /// Write the index, patch the header and close the file.
    pub fn finalize(mut self) -> Result<Vec<ArchiveEntry>> {
        self.finish()?;
        Ok(std::mem::take(&mut self.entries))
    }

    fn finish(&mut self) -> Result<()> {
        let Some(mut out) = self.out.take() else {
            return Ok(());
        };
        let index_offset = self.pos;
        let result = (|| -> std::io::Result<()> {
            out.seek(SeekFrom::Start(index_offset))?;
            out.write_u32::<LittleEndian>(self.entries.len() as u32)?;
            for entry in &self.entries {
                entry.write_to(&mut out)?;
            }
            out.seek(SeekFrom::Start(INDEX_OFFSET_POS))?;
            out.write_i64::<LittleEndian>(index_offset as i64)?;
            out.flush()?;
            out.get_ref().sync_all()
        })();
        result.map_err(|e| RdxError::io(&self.path, e))?;
        tracing::info!(
            path = %self.path.display(),
            entries = self.entries.len(),
            index_offset,
            "Finalized archive"
        );
        Ok(())
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        if self.out.is_some() {
            if let Err(e) = self.finish() {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to finalize archive on drop");
            }
        }
    }
}

fn check_cancel(cancel: &AtomicBool, name: &str) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        return Err(RdxError::Cancelled(name.to_string()));
    }
    Ok(())
}

fn default_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
