//! Chunked binary: repeated little-endian `type_id:u32 length:u32 payload` records.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use rdx_core::types::{DetectedFileType, FileTypeTag};
use rdx_schema::{FieldKind, SchemaDefinition};

use crate::parsed::{ParsedField, ParsedRepresentation, Span};
use crate::traits::SchemaParser;

const RECORD_HEADER: usize = 8;

pub struct ChunkedBinaryParser {
    schema: Arc<SchemaDefinition>,
}

impl ChunkedBinaryParser {
    pub fn new(schema: Arc<SchemaDefinition>) -> Self {
        Self { schema }
    }
}

impl SchemaParser for ChunkedBinaryParser {
    fn schema(&self) -> &Arc<SchemaDefinition> {
        &self.schema
    }

    fn can_parse(&self, file_type: &DetectedFileType, _prefix: &[u8]) -> bool {
        file_type.tag == FileTypeTag::ChunkedBinary
    }

    fn parse(&self, data: &[u8]) -> ParsedRepresentation {
        let mut rep = ParsedRepresentation::new(Arc::clone(&self.schema));
        let mut offset = 0usize;
        while offset + RECORD_HEADER <= data.len() {
            let type_id = LittleEndian::read_u32(&data[offset..offset + 4]);
            let length = LittleEndian::read_u32(&data[offset + 4..offset + 8]) as usize;
            let start = offset + RECORD_HEADER;
            if length > data.len() - start {
                tracing::debug!(offset, length, "Truncated TLV record, stopping");
                rep.metadata.insert("truncated_at".into(), offset.to_string());
                break;
            }
            rep.fields.push(ParsedField::record(
                "chunk",
                FieldKind::Record,
                vec![
                    ParsedField::integer("type_id", FieldKind::Integer, type_id as i64, Span::new(offset, 4)),
                    ParsedField::integer("length", FieldKind::LengthOf, length as i64, Span::new(offset + 4, 4)),
                    ParsedField::bytes(
                        "payload",
                        FieldKind::Bytes,
                        &data[start..start + length],
                        Some(Span::new(start, length)),
                    ),
                ],
            ));
            offset = start + length;
        }
        rep.metadata
            .insert("record_count".into(), rep.fields.len().to_string());
        rep.finish()
    }
}
