//! Plain record types. Callers only ever receive copies of these.

use rdx_core::types::{
    BundleId, ChunkId, FileId, FileTypeId, GeneratorId, SchemaId, TokenProfileId, VocabId,
};
use serde::{Deserialize, Serialize};

pub const LCM_SCHEMA_VERSION: i32 = 1;
pub const CODEC_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub schema_version: i32,
    pub created_at: i64,
    pub last_updated_at: i64,
    pub codec_version: String,
}

/// One file as seen by the corpus. `content_hash` is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub content_hash: String,
    pub path_hash: String,
    pub size_bytes: i64,
    pub file_type_id: FileTypeId,
    pub schema_id: SchemaId,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
    #[serde(default)]
    pub bundle_id: Option<BundleId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: FileId,
    pub info: FileInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunkInfo {
    pub file_id: FileId,
    pub offset_bytes: i64,
    pub length_bytes: i64,
    /// Strong hash, the authoritative equality check.
    pub chunk_hash: String,
    /// FNV-1a pre-filter.
    pub chunk_fingerprint: u64,
    pub schema_id: SchemaId,
    #[serde(default)]
    pub token_profile_id: Option<TokenProfileId>,
    pub seen_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: ChunkId,
    pub info: FileChunkInfo,
}

/// Result of a duplicate lookup. Only exact matches exist, so `similarity` is 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMatch {
    pub chunk_id: ChunkId,
    pub file_id: FileId,
    pub fingerprint: u64,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTypeRecord {
    pub file_type_id: FileTypeId,
    pub name: String,
    pub detector_signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub schema_id: SchemaId,
    pub name: String,
    pub version: i32,
    /// Serialized definition as handed over by the schema registry.
    pub definition: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub usage_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldStatUpdate {
    pub field_name: String,
    pub field_kind: String,
    pub stats_blob: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub bundle_id: BundleId,
    pub bundle_hash: String,
    pub label: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenProfile {
    pub token_profile_id: TokenProfileId,
    pub file_type_id: FileTypeId,
    pub ngram_order: i32,
    pub vocab_id: Option<VocabId>,
    pub stats_blob: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub usage_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub vocab_id: VocabId,
    pub file_type_id: FileTypeId,
    pub version: i32,
    pub vocab_blob: Vec<u8>,
}

/// A reusable value generator, with running averages of the bits spent on
/// its parameters and on the residual it leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorRecord {
    pub generator_id: GeneratorId,
    pub domain: String,
    pub description_blob: String,
    pub usage_count: i64,
    pub avg_param_bits: f64,
    pub avg_residual_bits: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaUsage {
    pub schema_id: SchemaId,
    pub name: String,
    pub version: i32,
    pub usage_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTypeCount {
    pub file_type_id: FileTypeId,
    pub name: String,
    pub file_count: i64,
}

/// Read-only summary for display.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CorpusStats {
    pub total_files: i64,
    pub total_bytes: i64,
    pub top_schemas: Vec<SchemaUsage>,
    pub top_file_types: Vec<FileTypeCount>,
}
