//! The RDX archive: a header, one block per file, and a trailing index.

pub mod format;
mod reader;
mod writer;

pub use format::{ArchiveEntry, ArchiveHeader, BlockHeader};
pub use reader::ArchiveReader;
pub use writer::ArchiveWriter;
