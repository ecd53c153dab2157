use std::path::Path;
use std::sync::Arc;

use rdx_core::types::DetectedFileType;
use rdx_core::{RdxError, Result};
use rdx_schema::SchemaDefinition;

use crate::parsed::ParsedRepresentation;

/// Trait for schema-driven parsers.
pub trait SchemaParser: Send + Sync {
    /// The schema this parser's output instantiates.
    fn schema(&self) -> &Arc<SchemaDefinition>;

    /// Whether this parser claims a file of the detected type.
    fn can_parse(&self, file_type: &DetectedFileType, prefix: &[u8]) -> bool;

    /// Parse in-memory content. Malformed records degrade, they never fail the file.
    fn parse(&self, data: &[u8]) -> ParsedRepresentation;

    /// Parse from file path. Only an unreadable file is an error.
    fn parse_file(&self, path: &Path) -> Result<ParsedRepresentation> {
        let data = std::fs::read(path).map_err(|e| RdxError::io(path, e))?;
        Ok(self.parse(&data))
    }
}
