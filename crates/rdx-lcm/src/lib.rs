//! Learning Corpus Model: the persistent cross-file index of files, chunks,
//! schemas and file types.
//!
//! Everything goes through the [`LcmStore`] trait. [`LcmDatabase`] is the
//! provided backend, either purely in memory or backed by a write-ahead
//! journal on disk.

pub mod database;
pub mod error;
mod journal;
pub mod records;
mod tables;
pub mod traits;

pub use database::LcmDatabase;
pub use error::{LcmError, Result};
pub use records::*;
pub use traits::LcmStore;
