//! Simple delimited tables. No quoting: the header row fixes the column count
//! and rows that disagree are dropped from the structure.

use std::sync::Arc;

use rdx_core::types::{DetectedFileType, FileTypeTag};
use rdx_schema::{FieldKind, SchemaDefinition};

use crate::parsed::{ParsedField, ParsedRepresentation, Span};
use crate::traits::SchemaParser;

pub struct CsvParser {
    schema: Arc<SchemaDefinition>,
}

impl CsvParser {
    pub fn new(schema: Arc<SchemaDefinition>) -> Self {
        Self { schema }
    }
}

/// `,` unless the header is tab-separated and has no commas.
pub fn delimiter_for(header: &[u8]) -> u8 {
    if header.contains(&b'\t') && !header.contains(&b',') {
        b'\t'
    } else {
        b','
    }
}

fn cells(line: &[u8], offset: usize, delimiter: u8) -> Vec<ParsedField> {
    let mut out = Vec::new();
    let mut start = 0usize;
    for cell in line.split(|&b| b == delimiter) {
        let span = Some(Span::new(offset + start, cell.len()));
        out.push(match std::str::from_utf8(cell) {
            Ok(s) => ParsedField::text("cell", FieldKind::String, s, span),
            Err(_) => ParsedField::bytes("cell", FieldKind::String, cell, span),
        });
        start += cell.len() + 1;
    }
    out
}

impl SchemaParser for CsvParser {
    fn schema(&self) -> &Arc<SchemaDefinition> {
        &self.schema
    }

    fn can_parse(&self, file_type: &DetectedFileType, _prefix: &[u8]) -> bool {
        file_type.tag == FileTypeTag::CsvSimple
    }

    fn parse(&self, data: &[u8]) -> ParsedRepresentation {
        let mut rep = ParsedRepresentation::new(Arc::clone(&self.schema));
        if data.is_empty() {
            return rep.finish();
        }

        let mut lines = data.split(|&b| b == b'\n').peekable();
        let Some(header_line) = lines.next() else {
            return rep.finish();
        };
        let delimiter = delimiter_for(header_line);
        let header = cells(header_line, 0, delimiter);
        let columns = header.len();

        let mut offset = header_line.len() + 1;
        let mut rows = Vec::new();
        let mut dropped = 0usize;
        while let Some(line) = lines.next() {
            if line.is_empty() && lines.peek().is_none() {
                break;
            }
            let row = cells(line, offset, delimiter);
            if row.len() == columns {
                rows.push(ParsedField::record("row", FieldKind::Record, row));
            } else {
                dropped += 1;
            }
            offset += line.len() + 1;
        }

        rep.metadata.insert("delimiter".into(), (delimiter as char).to_string());
        rep.metadata.insert("columns".into(), columns.to_string());
        rep.metadata.insert("rows".into(), rows.len().to_string());
        if dropped > 0 {
            tracing::debug!(dropped, columns, "CSV rows with mismatched field count dropped");
            rep.metadata.insert("dropped_rows".into(), dropped.to_string());
        }
        rep.fields.push(ParsedField::record(
            "csv_table",
            FieldKind::Record,
            vec![
                ParsedField::record("header", FieldKind::Array, header),
                ParsedField::record("rows", FieldKind::Array, rows),
            ],
        ));
        rep.finish()
    }
}
