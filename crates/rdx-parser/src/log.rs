//! Line-oriented log parser: `timestamp level [component] message`.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use rdx_core::types::{DetectedFileType, FileTypeTag};
use rdx_schema::{FieldKind, SchemaDefinition};

use crate::parsed::{ParsedField, ParsedRepresentation, Span};
use crate::traits::SchemaParser;

static RE_LOG_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}[\sT]\d{2}:\d{2}:\d{2})\s+(\w+)\s+\[(\w+)\]\s+(.*)$").unwrap()
});

pub struct LogParser {
    schema: Arc<SchemaDefinition>,
}

impl LogParser {
    pub fn new(schema: Arc<SchemaDefinition>) -> Self {
        Self { schema }
    }

    fn parse_line(line: &[u8], offset: usize) -> (ParsedField, bool) {
        let Ok(text) = std::str::from_utf8(line) else {
            let raw = ParsedField::bytes("message", FieldKind::String, line, Some(Span::new(offset, line.len())));
            return (ParsedField::record("log_line", FieldKind::Record, vec![raw]), false);
        };

        if let Some(caps) = RE_LOG_LINE.captures(text) {
            let parts = [
                ("timestamp", FieldKind::String),
                ("level", FieldKind::Enum),
                ("component", FieldKind::String),
                ("message", FieldKind::String),
            ];
            let children: Vec<ParsedField> = parts
                .iter()
                .enumerate()
                .filter_map(|(i, (name, kind))| {
                    caps.get(i + 1).map(|m| {
                        ParsedField::text(name, *kind, m.as_str(), Some(Span::new(offset + m.start(), m.len())))
                    })
                })
                .collect();
            return (ParsedField::record("log_line", FieldKind::Record, children), true);
        }

        let raw = ParsedField::text("message", FieldKind::String, text, Some(Span::new(offset, line.len())));
        (ParsedField::record("log_line", FieldKind::Record, vec![raw]), false)
    }
}

impl SchemaParser for LogParser {
    fn schema(&self) -> &Arc<SchemaDefinition> {
        &self.schema
    }

    fn can_parse(&self, file_type: &DetectedFileType, _prefix: &[u8]) -> bool {
        file_type.tag == FileTypeTag::LogLine
    }

    fn parse(&self, data: &[u8]) -> ParsedRepresentation {
        let mut rep = ParsedRepresentation::new(Arc::clone(&self.schema));
        let mut offset = 0usize;
        let mut unmatched = 0usize;
        let mut lines = data.split(|&b| b == b'\n').peekable();
        while let Some(line) = lines.next() {
            // Nothing follows the final newline.
            if line.is_empty() && lines.peek().is_none() {
                break;
            }
            let (field, matched) = Self::parse_line(line, offset);
            if !matched {
                unmatched += 1;
            }
            rep.fields.push(field);
            offset += line.len() + 1;
        }
        rep.metadata.insert("line_count".into(), rep.fields.len().to_string());
        if unmatched > 0 {
            tracing::debug!(unmatched, "Log lines stored as raw messages");
            rep.metadata.insert("raw_lines".into(), unmatched.to_string());
        }
        rep.finish()
    }
}
