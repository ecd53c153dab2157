//! Compression engine: detect, parse, split, block-compress, and record the
//! file in the corpus store.

use std::path::Path;
use std::sync::Arc;

use rdx_core::config::CompressionConfig;
use rdx_core::hash::{chunk_fingerprint, chunk_spans, content_hash, path_hash, sha256_hex};
use rdx_core::time::now_ts;
use rdx_core::types::{FileId, FileTypeId, SchemaId};
use rdx_core::{ByteBuffer, RdxError, Result};
use rdx_lcm::{FieldStatUpdate, FileChunkInfo, FileInfo, LcmStore};
use rdx_parser::{detect, ParserSet, SchemaParser};
use rdx_schema::SchemaRegistry;

use crate::block;
use crate::structural::{self, Split};

/// Outcome of compressing one file. Sizes are in bytes; stream sizes are
/// after block compression.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionResult {
    pub original_size: u64,
    pub structural_size: u64,
    pub residual_size: u64,
    pub schema_id: SchemaId,
    pub file_type_id: FileTypeId,
    /// Leaves carried by the structural stream.
    pub leaves: usize,
}

impl CompressionResult {
    pub fn compressed_size(&self) -> u64 {
        self.structural_size + self.residual_size
    }

    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 1.0;
        }
        self.compressed_size() as f64 / self.original_size as f64
    }
}

/// A compressed file ready to be written as an archive block.
#[derive(Debug, Clone)]
pub struct CompressedFile {
    pub result: CompressionResult,
    pub structural: ByteBuffer,
    pub residual: ByteBuffer,
    pub file_id: FileId,
}

pub struct CompressionEngine {
    store: Arc<dyn LcmStore>,
    registry: Arc<SchemaRegistry>,
    parsers: ParserSet,
    config: CompressionConfig,
}

impl CompressionEngine {
    pub fn new(
        store: Arc<dyn LcmStore>,
        registry: Arc<SchemaRegistry>,
        config: CompressionConfig,
    ) -> Result<Self> {
        let parsers = ParserSet::from_registry(&registry)?;
        Ok(Self {
            store,
            registry,
            parsers,
            config,
        })
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    pub fn compress_file(&self, path: &Path) -> Result<CompressedFile> {
        let data = std::fs::read(path).map_err(|e| RdxError::io(path, e))?;
        self.compress_bytes(path, &data)
    }

    /// `path_hint` drives extension detection and the stored path hash.
    pub fn compress_bytes(&self, path_hint: &Path, data: &[u8]) -> Result<CompressedFile> {
        let prefix = &data[..data.len().min(self.config.detect_prefix)];
        let detected = detect(path_hint, prefix);
        let file_type_id = self
            .store
            .get_or_create_file_type_id(detected.name(), &detected.signature)?;

        let parser = self.parsers.select(&detected, prefix);
        tracing::debug!(
            path = %path_hint.display(),
            file_type = detected.name(),
            signature = %detected.signature,
            parser = parser.name(),
            "Selected parser"
        );
        let rep = parser.parse(data);

        let schema_id = self.registry.resolve_id(parser.schema())?;
        self.store.increment_schema_usage(schema_id)?;

        let split = structural::split(&rep, schema_id, data);
        let structural = block::compress(&split.structural, self.config.level)?;
        let residual = block::compress(&split.residual, self.config.level)?;

        let now = now_ts();
        let file_id = self.store.register_file(&FileInfo {
            content_hash: content_hash(data),
            path_hash: path_hash(&path_hint.to_string_lossy()),
            size_bytes: data.len() as i64,
            file_type_id,
            schema_id,
            first_seen_at: now,
            last_seen_at: now,
            bundle_id: None,
        })?;
        self.record_chunks(file_id, schema_id, data)?;
        self.record_field_stats(schema_id, &split)?;

        let result = CompressionResult {
            original_size: data.len() as u64,
            structural_size: structural.len() as u64,
            residual_size: residual.len() as u64,
            schema_id,
            file_type_id,
            leaves: split.leaves,
        };
        tracing::info!(
            path = %path_hint.display(),
            original = result.original_size,
            compressed = result.compressed_size(),
            covered = split.covered,
            schema_id,
            "Compressed file"
        );
        Ok(CompressedFile {
            result,
            structural,
            residual,
            file_id,
        })
    }

    fn record_chunks(&self, file_id: FileId, schema_id: SchemaId, data: &[u8]) -> Result<()> {
        let chunks: Vec<FileChunkInfo> = chunk_spans(data.len(), self.config.chunk_size)
            .into_iter()
            .map(|(offset, len)| {
                let bytes = &data[offset..offset + len];
                FileChunkInfo {
                    file_id,
                    offset_bytes: offset as i64,
                    length_bytes: len as i64,
                    chunk_hash: sha256_hex(bytes),
                    chunk_fingerprint: chunk_fingerprint(bytes),
                    schema_id,
                    token_profile_id: None,
                    seen_count: 1,
                }
            })
            .collect();
        if chunks.is_empty() {
            return Ok(());
        }
        self.store.record_chunks(&chunks)?;
        Ok(())
    }

    fn record_field_stats(&self, schema_id: SchemaId, split: &Split) -> Result<()> {
        if split.field_stats.is_empty() {
            return Ok(());
        }
        let updates: Vec<FieldStatUpdate> = split
            .field_stats
            .iter()
            .map(|(name, stats)| FieldStatUpdate {
                field_name: name.clone(),
                field_kind: stats.kind.clone(),
                stats_blob: serde_json::json!({
                    "leaves": stats.leaves,
                    "bytes": stats.bytes,
                })
                .to_string(),
            })
            .collect();
        self.store.update_schema_stats(schema_id, &updates)?;
        Ok(())
    }
}
