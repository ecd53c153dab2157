//! Fallback parser: the whole file is one opaque blob.

use std::sync::Arc;

use rdx_core::types::DetectedFileType;
use rdx_schema::{FieldKind, SchemaDefinition};

use crate::parsed::{ParsedField, ParsedRepresentation, Span};
use crate::traits::SchemaParser;

pub struct UnstructuredParser {
    schema: Arc<SchemaDefinition>,
}

impl UnstructuredParser {
    pub fn new(schema: Arc<SchemaDefinition>) -> Self {
        Self { schema }
    }
}

impl SchemaParser for UnstructuredParser {
    fn schema(&self) -> &Arc<SchemaDefinition> {
        &self.schema
    }

    fn can_parse(&self, _file_type: &DetectedFileType, _prefix: &[u8]) -> bool {
        true
    }

    fn parse(&self, data: &[u8]) -> ParsedRepresentation {
        let mut rep = ParsedRepresentation::new(Arc::clone(&self.schema));
        rep.fields.push(ParsedField::bytes(
            "blob",
            FieldKind::Bytes,
            data,
            Some(Span::new(0, data.len())),
        ));
        rep.finish()
    }
}
