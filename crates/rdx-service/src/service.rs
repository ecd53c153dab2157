use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use rdx_codec::{ArchiveReader, ArchiveWriter, CompressedFile, CompressionEngine, DecompressionEngine};
use rdx_core::hash::sha256_hex;
use rdx_core::types::{BundleId, FileId};
use rdx_core::{RdxConfig, RdxError, Result};
use rdx_lcm::{CorpusStats, LcmDatabase, LcmStore};
use rdx_schema::SchemaRegistry;

use crate::cancel::CancelToken;
use crate::events::{BatchReport, JobFailure, JobObserver, JobOutcome, Stage};

/// The collaborator-facing API: batch compress into an archive, batch
/// extract from one, and corpus statistics.
pub struct RdxService {
    store: Arc<dyn LcmStore>,
    registry: Arc<SchemaRegistry>,
    engine: CompressionEngine,
    decoder: DecompressionEngine,
    config: RdxConfig,
    pool: Option<rayon::ThreadPool>,
    cancel: CancelToken,
}

impl RdxService {
    pub fn new(store: Arc<dyn LcmStore>, config: RdxConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(SchemaRegistry::new(Arc::clone(&store))?);
        let engine = CompressionEngine::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.compression.clone(),
        )?;
        let pool = if config.batch.workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.batch.workers)
                .thread_name(|i| format!("rdx-worker-{i}"))
                .build()
                .map_err(|e| RdxError::Config(format!("worker pool: {e}")))?;
            Some(pool)
        } else {
            None
        };
        tracing::info!(workers = config.batch.workers, "RDX service ready");
        Ok(Self {
            store,
            registry,
            engine,
            decoder: DecompressionEngine::new(),
            config,
            pool,
            cancel: CancelToken::new(),
        })
    }

    /// Open the journaled store named by `config.store` and build on it.
    pub fn open(config: RdxConfig) -> Result<Self> {
        let store = LcmDatabase::open_with_config(&config.store)?;
        Self::new(Arc::new(store), config)
    }

    pub fn store(&self) -> &Arc<dyn LcmStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RdxConfig {
        &self.config
    }

    /// Token observed by running batches. Cancelling it stops the current
    /// batch; it is reset when the next batch starts.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Compress `files` into a new archive. Per-file failures are reported
    /// and skipped; only failing to create or finalize the archive aborts.
    pub fn compress(
        &self,
        files: &[PathBuf],
        archive: &Path,
        observer: &mut dyn JobObserver,
    ) -> Result<BatchReport> {
        self.cancel.reset();
        let mut writer = ArchiveWriter::create(archive)?;
        let mut report = BatchReport::new(archive.to_path_buf());
        let mut stored: Vec<FileId> = Vec::new();

        let window = self.config.batch.workers.max(1);
        for batch in files.chunks(window) {
            if self.cancel.is_cancelled() {
                break;
            }
            let names: Vec<String> = batch.iter().map(|p| entry_name(p)).collect();
            for name in &names {
                observer.on_start(name);
            }
            let compressed = self.compress_window(batch);
            for (name, result) in names.iter().zip(compressed) {
                let cf = match result {
                    Ok(cf) => cf,
                    Err(e) => {
                        report.failure(observer, JobFailure::new(name, Stage::Compress, &e));
                        continue;
                    }
                };
                match writer.append(name, &cf) {
                    Ok(entry) => {
                        stored.push(cf.file_id);
                        let outcome = JobOutcome {
                            name: name.clone(),
                            original_size: entry.original_size,
                            compressed_size: entry.structural_size + entry.residual_size,
                            schema_id: entry.schema_id,
                            file_type_id: entry.file_type_id,
                        };
                        report.success(observer, outcome);
                    }
                    Err(e) => report.failure(observer, JobFailure::new(name, Stage::Write, &e)),
                }
            }
        }

        let handled = report.succeeded.len() + report.failed.len();
        for path in &files[handled..] {
            let name = entry_name(path);
            observer.on_start(&name);
            let e = RdxError::Cancelled(name.clone());
            report.failure(observer, JobFailure::new(&name, Stage::Compress, &e));
        }

        writer.finalize()?;
        if self.config.batch.bundle_archives && !stored.is_empty() {
            report.bundle_id = self.bundle(archive, &stored);
        }
        self.store.flush()?;
        tracing::info!(
            archive = %archive.display(),
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Compression batch finished"
        );
        Ok(report)
    }

    /// Compress one window of files, on the pool when there is one.
    /// Results come back in input order.
    fn compress_window(&self, batch: &[PathBuf]) -> Vec<Result<CompressedFile>> {
        let run = |path: &PathBuf| {
            if self.cancel.is_cancelled() {
                return Err(RdxError::Cancelled(entry_name(path)));
            }
            self.engine.compress_file(path)
        };
        match &self.pool {
            Some(pool) => pool.install(|| batch.par_iter().map(run).collect()),
            None => batch.iter().map(run).collect(),
        }
    }

    /// Group the archive's files under one bundle. Failures are logged and
    /// leave the files unbundled.
    fn bundle(&self, archive: &Path, files: &[FileId]) -> Option<BundleId> {
        let mut ids = files.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let label = entry_name(archive);
        let key = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
        let bundle_hash = sha256_hex(format!("{label}:{key}").as_bytes());

        let result = (|| -> rdx_lcm::Result<BundleId> {
            let bundle_id = self.store.create_bundle(&bundle_hash, &label)?;
            for &file_id in &ids {
                self.store.associate_file_with_bundle(file_id, bundle_id)?;
            }
            Ok(bundle_id)
        })();
        match result {
            Ok(id) => {
                tracing::debug!(bundle_id = id, files = ids.len(), "Bundled archive files");
                Some(id)
            }
            Err(e) => {
                tracing::warn!(archive = %archive.display(), error = %e, "Failed to bundle archive files");
                None
            }
        }
    }

    /// Extract every entry of `archive` into `out_dir`. An unreadable archive
    /// aborts; a bad entry is reported and skipped.
    pub fn decompress(
        &self,
        archive: &Path,
        out_dir: &Path,
        observer: &mut dyn JobObserver,
    ) -> Result<BatchReport> {
        self.cancel.reset();
        let reader = ArchiveReader::open(archive)?;
        std::fs::create_dir_all(out_dir).map_err(|e| RdxError::io(out_dir, e))?;
        let mut report = BatchReport::new(archive.to_path_buf());
        let mut used: HashSet<String> = HashSet::new();

        for (i, entry) in reader.entries().iter().enumerate() {
            observer.on_start(&entry.name);
            if self.cancel.is_cancelled() {
                let e = RdxError::Cancelled(entry.name.clone());
                report.failure(observer, JobFailure::new(&entry.name, Stage::Extract, &e));
                continue;
            }
            let file_name = unique_name(&mut used, sanitize_entry_name(&entry.name, i), i);
            let target = out_dir.join(&file_name);
            match reader.extract_entry(entry, &target, &self.decoder) {
                Ok(()) => {
                    let outcome = JobOutcome {
                        name: entry.name.clone(),
                        original_size: entry.original_size,
                        compressed_size: entry.structural_size + entry.residual_size,
                        schema_id: entry.schema_id,
                        file_type_id: entry.file_type_id,
                    };
                    report.success(observer, outcome);
                }
                Err(e) => report.failure(observer, JobFailure::new(&entry.name, Stage::Extract, &e)),
            }
        }
        tracing::info!(
            archive = %archive.display(),
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Decompression batch finished"
        );
        Ok(report)
    }

    pub fn corpus_stats(&self) -> Result<CorpusStats> {
        Ok(self.store.corpus_stats(self.config.stats.top_n)?)
    }
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Reserve `name` in `used`, falling back to `<index>_<name>` and then
/// `<index>_<n>_<name>` until a free one is found.
fn unique_name(used: &mut HashSet<String>, name: String, index: usize) -> String {
    if used.insert(name.clone()) {
        return name;
    }
    let mut candidate = format!("{index}_{name}");
    let mut n = 1usize;
    while !used.insert(candidate.clone()) {
        candidate = format!("{index}_{n}_{name}");
        n += 1;
    }
    candidate
}

/// A plain file name for an archive entry: the last path component, with
/// anything that could escape the output directory replaced. Falls back to
/// `entry_<index>`.
pub fn sanitize_entry_name(name: &str, index: usize) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = last
        .chars()
        .map(|c| if c.is_control() || c == ':' { '_' } else { c })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => format!("entry_{index}"),
        _ => cleaned,
    }
}
