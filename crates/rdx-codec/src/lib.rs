//! Structural/residual compression engines and the RDX archive container.

pub mod block;
pub mod container;
pub mod decompress;
pub mod engine;
pub mod structural;
mod varint;

pub use container::{ArchiveEntry, ArchiveReader, ArchiveWriter};
pub use decompress::DecompressionEngine;
pub use engine::{CompressedFile, CompressionEngine, CompressionResult};
pub use structural::{FieldStats, Split};

#[cfg(test)]
mod tests;
