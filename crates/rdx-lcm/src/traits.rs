use rdx_core::types::{
    BundleId, FileId, FileTypeId, GeneratorId, SchemaId, TokenProfileId, VocabId,
};

use crate::error::Result;
use crate::records::*;

/// Narrow persistence interface the engines are written against.
///
/// Every mutating call is atomic for the record it touches: it either fully
/// applies or leaves the store unchanged. Get-or-create calls resolve races to
/// a single winner per key.
pub trait LcmStore: Send + Sync {
    // ---- files ----

    /// Register a file. A content hash that is already known resolves to the
    /// existing file id and refreshes its `last_seen_at`.
    fn register_file(&self, info: &FileInfo) -> Result<FileId>;
    fn find_file_by_content_hash(&self, content_hash: &str) -> Result<Option<FileRecord>>;
    fn file(&self, file_id: FileId) -> Result<Option<FileRecord>>;
    fn update_file_last_seen(&self, file_id: FileId, timestamp: i64) -> Result<()>;

    // ---- chunks ----

    /// Record chunk rows. A row already present for the same file, offset and
    /// hash has its `seen_count` incremented instead.
    fn record_chunks(&self, chunks: &[FileChunkInfo]) -> Result<()>;
    fn chunks_for_file(&self, file_id: FileId) -> Result<Vec<ChunkRecord>>;
    /// Exact-fingerprint candidates, most seen first. A pre-filter only.
    fn find_similar_chunks(&self, fingerprint: u64, limit: usize) -> Result<Vec<ChunkMatch>>;
    /// Exact strong-hash matches, most seen first.
    fn find_similar_chunks_by_hash(&self, chunk_hash: &str, limit: usize) -> Result<Vec<ChunkMatch>>;

    // ---- file types ----

    fn get_or_create_file_type_id(&self, name: &str, detector_signature: &str) -> Result<FileTypeId>;
    fn file_type_name(&self, file_type_id: FileTypeId) -> Result<Option<String>>;

    // ---- schemas ----

    /// `(name, version)` is the idempotency key.
    fn get_or_create_schema_id(&self, name: &str, version: i32, definition: &str) -> Result<SchemaId>;
    fn load_schema_definition(&self, schema_id: SchemaId) -> Result<Option<String>>;
    fn schema_record(&self, schema_id: SchemaId) -> Result<Option<SchemaRecord>>;
    fn increment_schema_usage(&self, schema_id: SchemaId) -> Result<()>;
    fn update_schema_stats(&self, schema_id: SchemaId, updates: &[FieldStatUpdate]) -> Result<()>;
    fn schema_stats(&self, schema_id: SchemaId) -> Result<Vec<FieldStatUpdate>>;
    fn top_schemas_by_usage(&self, limit: usize) -> Result<Vec<SchemaUsage>>;

    // ---- bundles ----

    fn create_bundle(&self, bundle_hash: &str, label: &str) -> Result<BundleId>;
    fn associate_file_with_bundle(&self, file_id: FileId, bundle_id: BundleId) -> Result<()>;
    fn bundle(&self, bundle_id: BundleId) -> Result<Option<Bundle>>;

    // ---- token profiles / vocabularies ----

    fn get_or_create_token_profile_id(
        &self,
        file_type_id: FileTypeId,
        ngram_order: i32,
        vocab_id: Option<VocabId>,
        stats_blob: &str,
    ) -> Result<TokenProfileId>;
    fn update_token_profile_usage(&self, token_profile_id: TokenProfileId) -> Result<()>;
    fn token_profile(&self, token_profile_id: TokenProfileId) -> Result<Option<TokenProfile>>;
    fn register_vocabulary(&self, file_type_id: FileTypeId, version: i32, vocab_blob: &[u8]) -> Result<VocabId>;

    // ---- generators ----

    fn register_generator(&self, domain: &str, description_blob: &str) -> Result<GeneratorId>;
    /// Count one use and fold its bit costs into the running averages.
    fn record_generator_usage(&self, generator_id: GeneratorId, param_bits: f64, residual_bits: f64) -> Result<()>;
    fn generator(&self, generator_id: GeneratorId) -> Result<Option<GeneratorRecord>>;

    // ---- statistics ----

    fn total_files_tracked(&self) -> Result<i64>;
    fn total_corpus_size(&self) -> Result<i64>;
    fn top_file_types(&self, limit: usize) -> Result<Vec<FileTypeCount>>;
    fn meta(&self) -> Result<MetaRecord>;

    fn corpus_stats(&self, top_n: usize) -> Result<CorpusStats> {
        Ok(CorpusStats {
            total_files: self.total_files_tracked()?,
            total_bytes: self.total_corpus_size()?,
            top_schemas: self.top_schemas_by_usage(top_n)?,
            top_file_types: self.top_file_types(top_n)?,
        })
    }

    /// Make everything written so far durable.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
