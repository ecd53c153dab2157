//! Batch compress/decompress over RDX archives, reporting per-file job
//! events to a caller-supplied observer.

mod cancel;
mod events;
mod service;

pub use cancel::CancelToken;
pub use events::{BatchReport, JobEvent, JobFailure, JobLog, JobObserver, JobOutcome, Stage};
pub use rdx_lcm::CorpusStats;
pub use service::{sanitize_entry_name, RdxService};
