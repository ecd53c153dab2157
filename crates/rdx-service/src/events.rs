//! Per-file job events reported during a batch.

use std::path::PathBuf;

use rdx_core::types::{BundleId, FileTypeId, SchemaId};
use rdx_core::{ErrorKind, RdxError};
use serde::Serialize;

/// Where in a file's job a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Compress,
    Write,
    Extract,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub name: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub schema_id: SchemaId,
    pub file_type_id: FileTypeId,
}

impl JobOutcome {
    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 1.0;
        }
        self.compressed_size as f64 / self.original_size as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobFailure {
    pub name: String,
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(name: &str, stage: Stage, err: &RdxError) -> Self {
        Self {
            name: name.to_string(),
            stage,
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

/// Receives job status as a batch runs. Callbacks arrive on the calling
/// thread, in input order.
pub trait JobObserver {
    fn on_start(&mut self, name: &str);
    fn on_success(&mut self, outcome: &JobOutcome);
    fn on_failure(&mut self, failure: &JobFailure);
}

/// Discards every event.
impl JobObserver for () {
    fn on_start(&mut self, _name: &str) {}
    fn on_success(&mut self, _outcome: &JobOutcome) {}
    fn on_failure(&mut self, _failure: &JobFailure) {}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Started { name: String },
    Succeeded(JobOutcome),
    Failed(JobFailure),
}

/// Observer that keeps every event in order.
#[derive(Debug, Clone, Default)]
pub struct JobLog {
    events: Vec<JobEvent>,
}

impl JobLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[JobEvent] {
        &self.events
    }

    pub fn successes(&self) -> impl Iterator<Item = &JobOutcome> {
        self.events.iter().filter_map(|e| match e {
            JobEvent::Succeeded(o) => Some(o),
            _ => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobFailure> {
        self.events.iter().filter_map(|e| match e {
            JobEvent::Failed(f) => Some(f),
            _ => None,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.events)
    }
}

impl JobObserver for JobLog {
    fn on_start(&mut self, name: &str) {
        self.events.push(JobEvent::Started {
            name: name.to_string(),
        });
    }

    fn on_success(&mut self, outcome: &JobOutcome) {
        self.events.push(JobEvent::Succeeded(outcome.clone()));
    }

    fn on_failure(&mut self, failure: &JobFailure) {
        self.events.push(JobEvent::Failed(failure.clone()));
    }
}

/// Summary of one compress or decompress batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub archive: PathBuf,
    pub succeeded: Vec<JobOutcome>,
    pub failed: Vec<JobFailure>,
    /// Bundle grouping the archive's files, when bundling is enabled.
    pub bundle_id: Option<BundleId>,
}

impl BatchReport {
    pub fn new(archive: PathBuf) -> Self {
        Self {
            archive,
            ..Self::default()
        }
    }

    pub fn total_original(&self) -> u64 {
        self.succeeded.iter().map(|o| o.original_size).sum()
    }

    pub fn total_compressed(&self) -> u64 {
        self.succeeded.iter().map(|o| o.compressed_size).sum()
    }

    pub fn cancelled(&self) -> usize {
        self.failed.iter().filter(|f| f.is_cancelled()).count()
    }

    pub(crate) fn success(&mut self, observer: &mut dyn JobObserver, outcome: JobOutcome) {
        observer.on_success(&outcome);
        self.succeeded.push(outcome);
    }

    pub(crate) fn failure(&mut self, observer: &mut dyn JobObserver, failure: JobFailure) {
        tracing::warn!(
            file = %failure.name,
            stage = ?failure.stage,
            error = %failure.message,
            "File failed"
        );
        observer.on_failure(&failure);
        self.failed.push(failure);
    }
}
