//! File-type detection and the schema-driven parsers.

pub mod chunked;
pub mod csv;
pub mod detector;
pub mod json;
pub mod kv;
pub mod log;
pub mod parsed;
pub mod pe;
pub mod set;
pub mod traits;
pub mod unstructured;

pub use detector::detect;
pub use parsed::{ParsedField, ParsedRepresentation, ParsedValue, ResolvedLeaf, Span};
pub use set::{AnyParser, ParserSet};
pub use traits::SchemaParser;
