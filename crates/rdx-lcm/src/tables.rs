//! In-memory tables plus the secondary indexes rebuilt from them.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use rdx_core::types::{
    BundleId, ChunkId, FileId, FileTypeId, GeneratorId, SchemaId, TokenProfileId, VocabId,
};
use serde::{Deserialize, Serialize};

use crate::records::*;

/// A single state transition. The journal stores these verbatim, so replaying
/// them in order reproduces the tables exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum LcmOp {
    InitMeta(MetaRecord),
    InsertFile { file_id: FileId, info: FileInfo },
    TouchFile { file_id: FileId, at: i64 },
    RecordChunks { inserts: Vec<ChunkRecord>, bumps: Vec<ChunkId> },
    InsertFileType(FileTypeRecord),
    InsertSchema(SchemaRecord),
    IncrementSchemaUsage { schema_id: SchemaId, at: i64 },
    PutSchemaStats { schema_id: SchemaId, updates: Vec<FieldStatUpdate> },
    InsertBundle(Bundle),
    AssociateBundle { file_id: FileId, bundle_id: BundleId },
    InsertTokenProfile(TokenProfile),
    IncrementTokenProfileUsage { token_profile_id: TokenProfileId, at: i64 },
    InsertVocabulary(Vocabulary),
    InsertGenerator(GeneratorRecord),
    RecordGeneratorUsage { generator_id: GeneratorId, param_bits: f64, residual_bits: f64 },
    Snapshot(Box<Tables>),
}

impl LcmOp {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            LcmOp::InitMeta(_) => "init_meta",
            LcmOp::InsertFile { .. } => "insert_file",
            LcmOp::TouchFile { .. } => "touch_file",
            LcmOp::RecordChunks { .. } => "record_chunks",
            LcmOp::InsertFileType(_) => "insert_file_type",
            LcmOp::InsertSchema(_) => "insert_schema",
            LcmOp::IncrementSchemaUsage { .. } => "increment_schema_usage",
            LcmOp::PutSchemaStats { .. } => "put_schema_stats",
            LcmOp::InsertBundle(_) => "insert_bundle",
            LcmOp::AssociateBundle { .. } => "associate_bundle",
            LcmOp::InsertTokenProfile(_) => "insert_token_profile",
            LcmOp::IncrementTokenProfileUsage { .. } => "increment_token_profile_usage",
            LcmOp::InsertVocabulary(_) => "insert_vocabulary",
            LcmOp::InsertGenerator(_) => "insert_generator",
            LcmOp::RecordGeneratorUsage { .. } => "record_generator_usage",
            LcmOp::Snapshot(_) => "snapshot",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Tables {
    pub meta: Option<MetaRecord>,
    pub files: BTreeMap<FileId, FileInfo>,
    pub file_types: BTreeMap<FileTypeId, FileTypeRecord>,
    pub bundles: BTreeMap<BundleId, Bundle>,
    pub chunks: BTreeMap<ChunkId, FileChunkInfo>,
    pub token_profiles: BTreeMap<TokenProfileId, TokenProfile>,
    pub vocabularies: BTreeMap<VocabId, Vocabulary>,
    #[serde(default)]
    pub generators: BTreeMap<GeneratorId, GeneratorRecord>,
    pub schemas: BTreeMap<SchemaId, SchemaRecord>,
    /// Keyed by schema id, then field name.
    pub schema_stats: BTreeMap<SchemaId, BTreeMap<String, FieldStatUpdate>>,
    #[serde(skip)]
    pub idx: Indexes,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Indexes {
    pub file_by_content_hash: HashMap<String, FileId>,
    pub files_by_path_hash: HashMap<String, BTreeSet<FileId>>,
    pub files_by_type: HashMap<FileTypeId, BTreeSet<FileId>>,
    pub chunks_by_file: HashMap<FileId, BTreeSet<ChunkId>>,
    pub chunks_by_hash: HashMap<String, BTreeSet<ChunkId>>,
    pub chunks_by_fingerprint: HashMap<u64, BTreeSet<ChunkId>>,
    pub chunk_by_position: HashMap<(FileId, i64, String), ChunkId>,
    pub file_type_by_name: HashMap<String, FileTypeId>,
    pub schema_by_key: HashMap<(String, i32), SchemaId>,
    pub token_profile_by_key: HashMap<(FileTypeId, i32, Option<VocabId>), TokenProfileId>,
    pub schema_usage: BTreeSet<(Reverse<i64>, SchemaId)>,
    pub total_bytes: i64,
}

fn next_key<K: Copy + Into<i64>, V>(map: &BTreeMap<K, V>) -> i64 {
    map.keys().next_back().map(|k| (*k).into() + 1).unwrap_or(1)
}

impl Tables {
    pub(crate) fn next_file_id(&self) -> FileId {
        next_key(&self.files)
    }

    pub(crate) fn next_chunk_id(&self) -> ChunkId {
        next_key(&self.chunks)
    }

    pub(crate) fn next_bundle_id(&self) -> BundleId {
        next_key(&self.bundles)
    }

    pub(crate) fn next_token_profile_id(&self) -> TokenProfileId {
        next_key(&self.token_profiles)
    }

    pub(crate) fn next_vocab_id(&self) -> VocabId {
        next_key(&self.vocabularies)
    }

    pub(crate) fn next_generator_id(&self) -> GeneratorId {
        next_key(&self.generators)
    }

    pub(crate) fn next_file_type_id(&self) -> FileTypeId {
        self.file_types.keys().next_back().map(|k| k + 1).unwrap_or(1)
    }

    pub(crate) fn next_schema_id(&self) -> SchemaId {
        self.schemas.keys().next_back().map(|k| k + 1).unwrap_or(1)
    }

    pub(crate) fn apply(&mut self, op: LcmOp, at: i64) {
        match op {
            LcmOp::InitMeta(meta) => {
                self.meta = Some(meta);
                return;
            }
            LcmOp::InsertFile { file_id, info } => {
                self.index_file(file_id, &info);
                self.files.insert(file_id, info);
            }
            LcmOp::TouchFile { file_id, at } => {
                if let Some(info) = self.files.get_mut(&file_id) {
                    info.last_seen_at = at;
                }
            }
            LcmOp::RecordChunks { inserts, bumps } => {
                for chunk_id in bumps {
                    if let Some(chunk) = self.chunks.get_mut(&chunk_id) {
                        chunk.seen_count += 1;
                    }
                }
                for record in inserts {
                    self.index_chunk(record.chunk_id, &record.info);
                    self.chunks.insert(record.chunk_id, record.info);
                }
            }
            LcmOp::InsertFileType(record) => {
                self.idx
                    .file_type_by_name
                    .insert(record.name.clone(), record.file_type_id);
                self.file_types.insert(record.file_type_id, record);
            }
            LcmOp::InsertSchema(record) => {
                self.index_schema(&record);
                self.schemas.insert(record.schema_id, record);
            }
            LcmOp::IncrementSchemaUsage { schema_id, at } => {
                if let Some(record) = self.schemas.get_mut(&schema_id) {
                    self.idx
                        .schema_usage
                        .remove(&(Reverse(record.usage_count), schema_id));
                    record.usage_count += 1;
                    record.updated_at = at;
                    self.idx
                        .schema_usage
                        .insert((Reverse(record.usage_count), schema_id));
                }
            }
            LcmOp::PutSchemaStats { schema_id, updates } => {
                let stats = self.schema_stats.entry(schema_id).or_default();
                for update in updates {
                    stats.insert(update.field_name.clone(), update);
                }
            }
            LcmOp::InsertBundle(bundle) => {
                self.bundles.insert(bundle.bundle_id, bundle);
            }
            LcmOp::AssociateBundle { file_id, bundle_id } => {
                if let Some(info) = self.files.get_mut(&file_id) {
                    info.bundle_id = Some(bundle_id);
                }
            }
            LcmOp::InsertTokenProfile(profile) => {
                self.idx.token_profile_by_key.insert(
                    (profile.file_type_id, profile.ngram_order, profile.vocab_id),
                    profile.token_profile_id,
                );
                self.token_profiles.insert(profile.token_profile_id, profile);
            }
            LcmOp::IncrementTokenProfileUsage { token_profile_id, at } => {
                if let Some(profile) = self.token_profiles.get_mut(&token_profile_id) {
                    profile.usage_count += 1;
                    profile.updated_at = at;
                }
            }
            LcmOp::InsertVocabulary(vocab) => {
                self.vocabularies.insert(vocab.vocab_id, vocab);
            }
            LcmOp::InsertGenerator(generator) => {
                self.generators.insert(generator.generator_id, generator);
            }
            LcmOp::RecordGeneratorUsage {
                generator_id,
                param_bits,
                residual_bits,
            } => {
                if let Some(g) = self.generators.get_mut(&generator_id) {
                    g.usage_count += 1;
                    let n = g.usage_count as f64;
                    g.avg_param_bits += (param_bits - g.avg_param_bits) / n;
                    g.avg_residual_bits += (residual_bits - g.avg_residual_bits) / n;
                }
            }
            LcmOp::Snapshot(tables) => {
                *self = *tables;
                self.rebuild_indexes();
                return;
            }
        }
        if let Some(meta) = self.meta.as_mut() {
            meta.last_updated_at = at;
        }
    }

    pub(crate) fn rebuild_indexes(&mut self) {
        self.idx = Indexes::default();
        let files: Vec<(FileId, FileInfo)> =
            self.files.iter().map(|(k, v)| (*k, v.clone())).collect();
        for (file_id, info) in &files {
            self.index_file(*file_id, info);
        }
        let chunks: Vec<(ChunkId, FileChunkInfo)> =
            self.chunks.iter().map(|(k, v)| (*k, v.clone())).collect();
        for (chunk_id, info) in &chunks {
            self.index_chunk(*chunk_id, info);
        }
        for record in self.file_types.values() {
            self.idx
                .file_type_by_name
                .insert(record.name.clone(), record.file_type_id);
        }
        let schemas: Vec<SchemaRecord> = self.schemas.values().cloned().collect();
        for record in &schemas {
            self.index_schema(record);
        }
        for profile in self.token_profiles.values() {
            self.idx.token_profile_by_key.insert(
                (profile.file_type_id, profile.ngram_order, profile.vocab_id),
                profile.token_profile_id,
            );
        }
    }

    fn index_file(&mut self, file_id: FileId, info: &FileInfo) {
        self.idx
            .file_by_content_hash
            .insert(info.content_hash.clone(), file_id);
        self.idx
            .files_by_path_hash
            .entry(info.path_hash.clone())
            .or_default()
            .insert(file_id);
        self.idx
            .files_by_type
            .entry(info.file_type_id)
            .or_default()
            .insert(file_id);
        self.idx.total_bytes += info.size_bytes;
    }

    fn index_chunk(&mut self, chunk_id: ChunkId, info: &FileChunkInfo) {
        self.idx
            .chunks_by_file
            .entry(info.file_id)
            .or_default()
            .insert(chunk_id);
        self.idx
            .chunks_by_hash
            .entry(info.chunk_hash.clone())
            .or_default()
            .insert(chunk_id);
        self.idx
            .chunks_by_fingerprint
            .entry(info.chunk_fingerprint)
            .or_default()
            .insert(chunk_id);
        self.idx.chunk_by_position.insert(
            (info.file_id, info.offset_bytes, info.chunk_hash.clone()),
            chunk_id,
        );
    }

    fn index_schema(&mut self, record: &SchemaRecord) {
        self.idx
            .schema_by_key
            .insert((record.name.clone(), record.version), record.schema_id);
        self.idx
            .schema_usage
            .insert((Reverse(record.usage_count), record.schema_id));
    }

    /// Chunks from `ids`, most seen first, ties broken by chunk id.
    pub(crate) fn ranked_matches(&self, ids: Option<&BTreeSet<ChunkId>>, limit: usize) -> Vec<ChunkMatch> {
        let Some(ids) = ids else {
            return Vec::new();
        };
        let mut rows: Vec<(ChunkId, &FileChunkInfo)> = ids
            .iter()
            .filter_map(|id| self.chunks.get(id).map(|c| (*id, c)))
            .collect();
        rows.sort_by(|a, b| b.1.seen_count.cmp(&a.1.seen_count).then(a.0.cmp(&b.0)));
        rows.into_iter()
            .take(limit)
            .map(|(chunk_id, info)| ChunkMatch {
                chunk_id,
                file_id: info.file_id,
                fingerprint: info.chunk_fingerprint,
                similarity: 1.0,
            })
            .collect()
    }
}
