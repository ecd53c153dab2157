//! Decompression engine: undo both block streams and merge them back into
//! the original bytes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rdx_core::{ByteBuffer, RdxError, Result};

use crate::block;
use crate::container::ArchiveEntry;
use crate::structural;

#[derive(Debug, Clone, Copy, Default)]
pub struct DecompressionEngine;

impl DecompressionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Rebuild the file described by `entry`. Fails with a codec error unless
    /// the result is exactly `entry.original_size` bytes.
    pub fn decompress(&self, entry: &ArchiveEntry, structural: &[u8], residual: &[u8]) -> Result<ByteBuffer> {
        let original_size = usize::try_from(entry.original_size)
            .map_err(|_| RdxError::Codec(format!("original size {} out of range", entry.original_size)))?;

        let structural = block::decompress(structural)?;
        let (header, _) = structural::read_header(&structural)?;
        if header.schema_id != entry.schema_id {
            return Err(RdxError::Codec(format!(
                "{}: structural stream carries schema {}, index says {}",
                entry.name, header.schema_id, entry.schema_id
            )));
        }
        if header.residual_len > original_size {
            return Err(RdxError::Codec(format!(
                "{}: residual length {} exceeds original size {original_size}",
                entry.name, header.residual_len
            )));
        }
        let residual = block::decompress_exact(residual, header.residual_len)?;
        let out = structural::merge(&structural, &residual, original_size)?;
        tracing::debug!(
            entry = %entry.name,
            leaves = header.leaf_count,
            residual = header.residual_len,
            "Merged structural and residual streams"
        );
        Ok(out)
    }

    /// Write the rebuilt file to `output`. The file appears only once fully
    /// written.
    pub fn decompress_to_file(
        &self,
        entry: &ArchiveEntry,
        structural: &[u8],
        residual: &[u8],
        output: &Path,
    ) -> Result<()> {
        let data = self.decompress(entry, structural, residual)?;
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| RdxError::io(parent, e))?;
        }
        let tmp = tmp_path(output);
        let result = (|| -> std::io::Result<()> {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&data)?;
            f.flush()?;
            f.sync_all()?;
            fs::rename(&tmp, output)
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(RdxError::io(output, e));
        }
        Ok(())
    }
}

fn tmp_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!(".{name}.rdx-tmp"))
}
