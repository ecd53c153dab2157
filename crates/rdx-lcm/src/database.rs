use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::RwLock;
use rdx_core::config::StoreConfig;
use rdx_core::time::now_ts;
use rdx_core::types::{
    BundleId, ChunkId, FileId, FileTypeId, GeneratorId, SchemaId, TokenProfileId, VocabId,
};

use crate::error::{LcmError, Result};
use crate::journal::{Journal, JournalEntry};
use crate::records::*;
use crate::tables::{LcmOp, Tables};
use crate::traits::LcmStore;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

struct Inner {
    tables: Tables,
    journal: Option<Journal>,
}

/// The LCM store. Either purely in memory or journaled to a single file.
///
/// Writers are serialized by one lock; every mutation is planned against the
/// current tables, made durable in the journal, and only then applied.
pub struct LcmDatabase {
    inner: RwLock<Inner>,
    path: Option<PathBuf>,
    lock_timeout: Duration,
}

impl LcmDatabase {
    pub fn in_memory() -> Self {
        let mut tables = Tables::default();
        let now = now_ts();
        tables.apply(LcmOp::InitMeta(fresh_meta(now)), now);
        Self {
            inner: RwLock::new(Inner {
                tables,
                journal: None,
            }),
            path: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Open or create a journaled store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let (journal, tables) = Journal::open(path)?;
        let db = Self {
            inner: RwLock::new(Inner {
                tables,
                journal: Some(journal),
            }),
            path: Some(path.to_path_buf()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        };

        let existing = db.inner.read().tables.meta.clone();
        match existing {
            None => {
                db.mutate("init_meta", |_| Ok((Some(LcmOp::InitMeta(fresh_meta(now_ts()))), ())))?;
            }
            Some(meta) if meta.schema_version > LCM_SCHEMA_VERSION => {
                return Err(LcmError::Conflict(format!(
                    "store schema version {} is newer than supported {}",
                    meta.schema_version, LCM_SCHEMA_VERSION
                )));
            }
            Some(_) => {}
        }
        tracing::info!(path = %path.display(), "Opened LCM store");
        Ok(db)
    }

    pub fn open_with_config(config: &StoreConfig) -> Result<Self> {
        Ok(Self::open(&config.path)?.with_lock_timeout(config.lock_timeout()))
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Rewrite the journal as a single snapshot. No-op for in-memory stores.
    pub fn compact(&self) -> Result<()> {
        let mut guard = self
            .inner
            .try_write_for(self.lock_timeout)
            .ok_or(LcmError::Timeout("compact"))?;
        let inner = &mut *guard;
        if let Some(journal) = inner.journal.as_mut() {
            journal.compact(&inner.tables, now_ts())?;
            tracing::info!(files = inner.tables.files.len(), "Compacted LCM journal");
        }
        Ok(())
    }

    fn read<T>(&self, op: &'static str, f: impl FnOnce(&Tables) -> Result<T>) -> Result<T> {
        let guard = self
            .inner
            .try_read_for(self.lock_timeout)
            .ok_or(LcmError::Timeout(op))?;
        f(&guard.tables)
    }

    /// Plan a change under the write lock, journal it, then apply it.
    /// A planner returning `None` leaves the store untouched.
    fn mutate<T>(
        &self,
        op: &'static str,
        plan: impl FnOnce(&Tables) -> Result<(Option<LcmOp>, T)>,
    ) -> Result<T> {
        let mut guard = self
            .inner
            .try_write_for(self.lock_timeout)
            .ok_or(LcmError::Timeout(op))?;
        let inner = &mut *guard;
        let (planned, out) = plan(&inner.tables)?;
        if let Some(planned) = planned {
            let entry = JournalEntry {
                at: now_ts(),
                op: planned,
            };
            if let Some(journal) = inner.journal.as_mut() {
                journal.append(&entry)?;
            }
            tracing::trace!(op = entry.op.name(), "Applying LCM op");
            inner.tables.apply(entry.op, entry.at);
        }
        Ok(out)
    }
}

fn fresh_meta(now: i64) -> MetaRecord {
    MetaRecord {
        schema_version: LCM_SCHEMA_VERSION,
        created_at: now,
        last_updated_at: now,
        codec_version: CODEC_VERSION.to_string(),
    }
}

fn require_file_type(t: &Tables, id: FileTypeId) -> Result<()> {
    if t.file_types.contains_key(&id) {
        Ok(())
    } else {
        Err(LcmError::ForeignKey(format!("unknown file type {id}")))
    }
}

fn require_schema(t: &Tables, id: SchemaId) -> Result<()> {
    if t.schemas.contains_key(&id) {
        Ok(())
    } else {
        Err(LcmError::ForeignKey(format!("unknown schema {id}")))
    }
}

fn require_file(t: &Tables, id: FileId) -> Result<()> {
    if t.files.contains_key(&id) {
        Ok(())
    } else {
        Err(LcmError::ForeignKey(format!("unknown file {id}")))
    }
}

fn require_bundle(t: &Tables, id: BundleId) -> Result<()> {
    if t.bundles.contains_key(&id) {
        Ok(())
    } else {
        Err(LcmError::ForeignKey(format!("unknown bundle {id}")))
    }
}

impl LcmStore for LcmDatabase {
    fn register_file(&self, info: &FileInfo) -> Result<FileId> {
        self.mutate("register_file", |t| {
            if let Some(&file_id) = t.idx.file_by_content_hash.get(&info.content_hash) {
                let op = LcmOp::TouchFile {
                    file_id,
                    at: info.last_seen_at,
                };
                return Ok((Some(op), file_id));
            }
            require_file_type(t, info.file_type_id)?;
            require_schema(t, info.schema_id)?;
            if let Some(bundle_id) = info.bundle_id {
                require_bundle(t, bundle_id)?;
            }
            let file_id = t.next_file_id();
            let op = LcmOp::InsertFile {
                file_id,
                info: info.clone(),
            };
            Ok((Some(op), file_id))
        })
    }

    fn find_file_by_content_hash(&self, content_hash: &str) -> Result<Option<FileRecord>> {
        self.read("find_file_by_content_hash", |t| {
            Ok(t.idx.file_by_content_hash.get(content_hash).and_then(|id| {
                t.files.get(id).map(|info| FileRecord {
                    file_id: *id,
                    info: info.clone(),
                })
            }))
        })
    }

    fn file(&self, file_id: FileId) -> Result<Option<FileRecord>> {
        self.read("file", |t| {
            Ok(t.files.get(&file_id).map(|info| FileRecord {
                file_id,
                info: info.clone(),
            }))
        })
    }

    fn update_file_last_seen(&self, file_id: FileId, timestamp: i64) -> Result<()> {
        self.mutate("update_file_last_seen", |t| {
            if !t.files.contains_key(&file_id) {
                return Err(LcmError::NotFound(format!("file {file_id}")));
            }
            Ok((Some(LcmOp::TouchFile { file_id, at: timestamp }), ()))
        })
    }

    fn record_chunks(&self, chunks: &[FileChunkInfo]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        self.mutate("record_chunks", |t| {
            let mut inserts: Vec<ChunkRecord> = Vec::new();
            let mut pending: HashMap<(FileId, i64, &str), usize> = HashMap::new();
            let mut bumps: Vec<ChunkId> = Vec::new();
            let mut next_id = t.next_chunk_id();

            for chunk in chunks {
                require_file(t, chunk.file_id)?;
                require_schema(t, chunk.schema_id)?;
                if let Some(profile_id) = chunk.token_profile_id {
                    if !t.token_profiles.contains_key(&profile_id) {
                        return Err(LcmError::ForeignKey(format!(
                            "unknown token profile {profile_id}"
                        )));
                    }
                }

                let key = (chunk.file_id, chunk.offset_bytes, chunk.chunk_hash.clone());
                if let Some(&chunk_id) = t.idx.chunk_by_position.get(&key) {
                    bumps.push(chunk_id);
                    continue;
                }
                let local = (chunk.file_id, chunk.offset_bytes, chunk.chunk_hash.as_str());
                if let Some(&i) = pending.get(&local) {
                    inserts[i].info.seen_count += 1;
                    continue;
                }
                let mut info = chunk.clone();
                info.seen_count = info.seen_count.max(1);
                pending.insert(local, inserts.len());
                inserts.push(ChunkRecord {
                    chunk_id: next_id,
                    info,
                });
                next_id += 1;
            }
            Ok((Some(LcmOp::RecordChunks { inserts, bumps }), ()))
        })
    }

    fn chunks_for_file(&self, file_id: FileId) -> Result<Vec<ChunkRecord>> {
        self.read("chunks_for_file", |t| {
            let mut out: Vec<ChunkRecord> = t
                .idx
                .chunks_by_file
                .get(&file_id)
                .into_iter()
                .flatten()
                .filter_map(|id| {
                    t.chunks.get(id).map(|info| ChunkRecord {
                        chunk_id: *id,
                        info: info.clone(),
                    })
                })
                .collect();
            out.sort_by_key(|c| (c.info.offset_bytes, c.chunk_id));
            Ok(out)
        })
    }

    fn find_similar_chunks(&self, fingerprint: u64, limit: usize) -> Result<Vec<ChunkMatch>> {
        self.read("find_similar_chunks", |t| {
            Ok(t.ranked_matches(t.idx.chunks_by_fingerprint.get(&fingerprint), limit))
        })
    }

    fn find_similar_chunks_by_hash(&self, chunk_hash: &str, limit: usize) -> Result<Vec<ChunkMatch>> {
        self.read("find_similar_chunks_by_hash", |t| {
            Ok(t.ranked_matches(t.idx.chunks_by_hash.get(chunk_hash), limit))
        })
    }

    fn get_or_create_file_type_id(&self, name: &str, detector_signature: &str) -> Result<FileTypeId> {
        self.mutate("get_or_create_file_type_id", |t| {
            if let Some(&id) = t.idx.file_type_by_name.get(name) {
                return Ok((None, id));
            }
            let file_type_id = t.next_file_type_id();
            let op = LcmOp::InsertFileType(FileTypeRecord {
                file_type_id,
                name: name.to_string(),
                detector_signature: detector_signature.to_string(),
            });
            Ok((Some(op), file_type_id))
        })
    }

    fn file_type_name(&self, file_type_id: FileTypeId) -> Result<Option<String>> {
        self.read("file_type_name", |t| {
            Ok(t.file_types.get(&file_type_id).map(|r| r.name.clone()))
        })
    }

    fn get_or_create_schema_id(&self, name: &str, version: i32, definition: &str) -> Result<SchemaId> {
        self.mutate("get_or_create_schema_id", |t| {
            if let Some(&id) = t.idx.schema_by_key.get(&(name.to_string(), version)) {
                return Ok((None, id));
            }
            if name.is_empty() || version < 1 {
                return Err(LcmError::Conflict(format!(
                    "invalid schema key ({name:?}, {version})"
                )));
            }
            let schema_id = t.next_schema_id();
            let now = now_ts();
            let op = LcmOp::InsertSchema(SchemaRecord {
                schema_id,
                name: name.to_string(),
                version,
                definition: definition.to_string(),
                created_at: now,
                updated_at: now,
                usage_count: 0,
            });
            Ok((Some(op), schema_id))
        })
    }

    fn load_schema_definition(&self, schema_id: SchemaId) -> Result<Option<String>> {
        self.read("load_schema_definition", |t| {
            Ok(t.schemas.get(&schema_id).map(|r| r.definition.clone()))
        })
    }

    fn schema_record(&self, schema_id: SchemaId) -> Result<Option<SchemaRecord>> {
        self.read("schema_record", |t| Ok(t.schemas.get(&schema_id).cloned()))
    }

    fn increment_schema_usage(&self, schema_id: SchemaId) -> Result<()> {
        self.mutate("increment_schema_usage", |t| {
            if !t.schemas.contains_key(&schema_id) {
                return Err(LcmError::NotFound(format!("schema {schema_id}")));
            }
            let op = LcmOp::IncrementSchemaUsage {
                schema_id,
                at: now_ts(),
            };
            Ok((Some(op), ()))
        })
    }

    fn update_schema_stats(&self, schema_id: SchemaId, updates: &[FieldStatUpdate]) -> Result<()> {
        self.mutate("update_schema_stats", |t| {
            if !t.schemas.contains_key(&schema_id) {
                return Err(LcmError::NotFound(format!("schema {schema_id}")));
            }
            if updates.is_empty() {
                return Ok((None, ()));
            }
            let op = LcmOp::PutSchemaStats {
                schema_id,
                updates: updates.to_vec(),
            };
            Ok((Some(op), ()))
        })
    }

    fn schema_stats(&self, schema_id: SchemaId) -> Result<Vec<FieldStatUpdate>> {
        self.read("schema_stats", |t| {
            Ok(t.schema_stats
                .get(&schema_id)
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn top_schemas_by_usage(&self, limit: usize) -> Result<Vec<SchemaUsage>> {
        self.read("top_schemas_by_usage", |t| {
            Ok(t.idx
                .schema_usage
                .iter()
                .filter_map(|(_, id)| t.schemas.get(id))
                .take(limit)
                .map(|r| SchemaUsage {
                    schema_id: r.schema_id,
                    name: r.name.clone(),
                    version: r.version,
                    usage_count: r.usage_count,
                })
                .collect())
        })
    }

    fn create_bundle(&self, bundle_hash: &str, label: &str) -> Result<BundleId> {
        self.mutate("create_bundle", |t| {
            if let Some(existing) = t.bundles.values().find(|b| b.bundle_hash == bundle_hash) {
                return Ok((None, existing.bundle_id));
            }
            let bundle_id = t.next_bundle_id();
            let op = LcmOp::InsertBundle(Bundle {
                bundle_id,
                bundle_hash: bundle_hash.to_string(),
                label: label.to_string(),
                created_at: now_ts(),
            });
            Ok((Some(op), bundle_id))
        })
    }

    fn associate_file_with_bundle(&self, file_id: FileId, bundle_id: BundleId) -> Result<()> {
        self.mutate("associate_file_with_bundle", |t| {
            require_file(t, file_id)?;
            require_bundle(t, bundle_id)?;
            Ok((Some(LcmOp::AssociateBundle { file_id, bundle_id }), ()))
        })
    }

    fn bundle(&self, bundle_id: BundleId) -> Result<Option<Bundle>> {
        self.read("bundle", |t| Ok(t.bundles.get(&bundle_id).cloned()))
    }

    fn get_or_create_token_profile_id(
        &self,
        file_type_id: FileTypeId,
        ngram_order: i32,
        vocab_id: Option<VocabId>,
        stats_blob: &str,
    ) -> Result<TokenProfileId> {
        self.mutate("get_or_create_token_profile_id", |t| {
            if let Some(&id) = t
                .idx
                .token_profile_by_key
                .get(&(file_type_id, ngram_order, vocab_id))
            {
                return Ok((None, id));
            }
            require_file_type(t, file_type_id)?;
            if let Some(vocab_id) = vocab_id {
                if !t.vocabularies.contains_key(&vocab_id) {
                    return Err(LcmError::ForeignKey(format!("unknown vocabulary {vocab_id}")));
                }
            }
            let token_profile_id = t.next_token_profile_id();
            let now = now_ts();
            let op = LcmOp::InsertTokenProfile(TokenProfile {
                token_profile_id,
                file_type_id,
                ngram_order,
                vocab_id,
                stats_blob: stats_blob.to_string(),
                created_at: now,
                updated_at: now,
                usage_count: 0,
            });
            Ok((Some(op), token_profile_id))
        })
    }

    fn update_token_profile_usage(&self, token_profile_id: TokenProfileId) -> Result<()> {
        self.mutate("update_token_profile_usage", |t| {
            if !t.token_profiles.contains_key(&token_profile_id) {
                return Err(LcmError::NotFound(format!("token profile {token_profile_id}")));
            }
            let op = LcmOp::IncrementTokenProfileUsage {
                token_profile_id,
                at: now_ts(),
            };
            Ok((Some(op), ()))
        })
    }

    fn token_profile(&self, token_profile_id: TokenProfileId) -> Result<Option<TokenProfile>> {
        self.read("token_profile", |t| {
            Ok(t.token_profiles.get(&token_profile_id).cloned())
        })
    }

    fn register_vocabulary(&self, file_type_id: FileTypeId, version: i32, vocab_blob: &[u8]) -> Result<VocabId> {
        self.mutate("register_vocabulary", |t| {
            require_file_type(t, file_type_id)?;
            let vocab_id = t.next_vocab_id();
            let op = LcmOp::InsertVocabulary(Vocabulary {
                vocab_id,
                file_type_id,
                version,
                vocab_blob: vocab_blob.to_vec(),
            });
            Ok((Some(op), vocab_id))
        })
    }

    fn register_generator(&self, domain: &str, description_blob: &str) -> Result<GeneratorId> {
        self.mutate("register_generator", |t| {
            let generator_id = t.next_generator_id();
            let op = LcmOp::InsertGenerator(GeneratorRecord {
                generator_id,
                domain: domain.to_string(),
                description_blob: description_blob.to_string(),
                usage_count: 0,
                avg_param_bits: 0.0,
                avg_residual_bits: 0.0,
            });
            Ok((Some(op), generator_id))
        })
    }

    fn record_generator_usage(&self, generator_id: GeneratorId, param_bits: f64, residual_bits: f64) -> Result<()> {
        self.mutate("record_generator_usage", |t| {
            if !t.generators.contains_key(&generator_id) {
                return Err(LcmError::NotFound(format!("generator {generator_id}")));
            }
            if !param_bits.is_finite() || !residual_bits.is_finite() {
                return Err(LcmError::Conflict(format!(
                    "generator {generator_id}: bit costs must be finite"
                )));
            }
            let op = LcmOp::RecordGeneratorUsage {
                generator_id,
                param_bits,
                residual_bits,
            };
            Ok((Some(op), ()))
        })
    }

    fn generator(&self, generator_id: GeneratorId) -> Result<Option<GeneratorRecord>> {
        self.read("generator", |t| Ok(t.generators.get(&generator_id).cloned()))
    }

    fn total_files_tracked(&self) -> Result<i64> {
        self.read("total_files_tracked", |t| Ok(t.files.len() as i64))
    }

    fn total_corpus_size(&self) -> Result<i64> {
        self.read("total_corpus_size", |t| Ok(t.idx.total_bytes))
    }

    fn top_file_types(&self, limit: usize) -> Result<Vec<FileTypeCount>> {
        self.read("top_file_types", |t| {
            let mut counts: Vec<FileTypeCount> = t
                .idx
                .files_by_type
                .iter()
                .filter(|(_, files)| !files.is_empty())
                .map(|(id, files)| FileTypeCount {
                    file_type_id: *id,
                    name: t
                        .file_types
                        .get(id)
                        .map(|r| r.name.clone())
                        .unwrap_or_default(),
                    file_count: files.len() as i64,
                })
                .collect();
            counts.sort_by(|a, b| {
                b.file_count
                    .cmp(&a.file_count)
                    .then(a.file_type_id.cmp(&b.file_type_id))
            });
            counts.truncate(limit);
            Ok(counts)
        })
    }

    fn meta(&self) -> Result<MetaRecord> {
        self.read("meta", |t| {
            t.meta
                .clone()
                .ok_or_else(|| LcmError::NotFound("meta".to_string()))
        })
    }

    fn flush(&self) -> Result<()> {
        let mut guard = self
            .inner
            .try_write_for(self.lock_timeout)
            .ok_or(LcmError::Timeout("flush"))?;
        if let Some(journal) = guard.journal.as_mut() {
            journal.sync()?;
        }
        Ok(())
    }
}
