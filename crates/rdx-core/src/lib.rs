//! Shared building blocks for the RDX structure-aware compressor.

pub mod buffer;
pub mod config;
pub mod error;
pub mod hash;
pub mod time;
pub mod types;

pub use buffer::ByteBuffer;
pub use config::RdxConfig;
pub use error::{ErrorKind, RdxError, Result};
pub use types::{DetectedFileType, FileTypeTag};
