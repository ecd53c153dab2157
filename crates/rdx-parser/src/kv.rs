//! INI-style key/value configuration.

use std::sync::Arc;

use rdx_core::types::{DetectedFileType, FileTypeTag};
use rdx_schema::{FieldKind, SchemaDefinition};

use crate::parsed::{ParsedField, ParsedRepresentation, Span};
use crate::traits::SchemaParser;

pub struct KvConfigParser {
    schema: Arc<SchemaDefinition>,
}

impl KvConfigParser {
    pub fn new(schema: Arc<SchemaDefinition>) -> Self {
        Self { schema }
    }
}

fn is_pad(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r')
}

/// `(offset, trimmed)` relative to `s`.
fn trim_span(s: &str) -> (usize, &str) {
    let start = s.len() - s.trim_start_matches(is_pad).len();
    (start, s.trim_matches(is_pad))
}

impl SchemaParser for KvConfigParser {
    fn schema(&self) -> &Arc<SchemaDefinition> {
        &self.schema
    }

    fn can_parse(&self, file_type: &DetectedFileType, _prefix: &[u8]) -> bool {
        file_type.tag == FileTypeTag::KvConfig
    }

    fn parse(&self, data: &[u8]) -> ParsedRepresentation {
        let mut rep = ParsedRepresentation::new(Arc::clone(&self.schema));
        let mut section = String::new();
        let mut offset = 0usize;
        let mut entries = 0usize;
        let mut skipped = 0usize;

        for raw in data.split(|&b| b == b'\n') {
            let line_start = offset;
            offset += raw.len() + 1;

            let Ok(line) = std::str::from_utf8(raw) else {
                skipped += 1;
                continue;
            };
            let (lead, line) = trim_span(line);
            let base = line_start + lead;
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                if !name.is_empty() && !name.contains(']') {
                    section = name.to_string();
                    rep.fields.push(ParsedField::text(
                        "section_header",
                        FieldKind::String,
                        name,
                        Some(Span::new(base + 1, name.len())),
                    ));
                    continue;
                }
            }

            let Some(eq) = line.find('=') else {
                skipped += 1;
                continue;
            };
            let (key_lead, key) = trim_span(&line[..eq]);
            let (value_lead, value) = trim_span(&line[eq + 1..]);
            if key.is_empty() || value.is_empty() {
                skipped += 1;
                continue;
            }
            rep.fields.push(ParsedField::record(
                "kv_entry",
                FieldKind::Record,
                vec![
                    ParsedField::text("section", FieldKind::String, &section, None),
                    ParsedField::text("key", FieldKind::String, key, Some(Span::new(base + key_lead, key.len()))),
                    ParsedField::text(
                        "value",
                        FieldKind::String,
                        value,
                        Some(Span::new(base + eq + 1 + value_lead, value.len())),
                    ),
                ],
            ));
            entries += 1;
        }

        rep.metadata.insert("entries".into(), entries.to_string());
        if skipped > 0 {
            tracing::debug!(skipped, "Unrecognised config lines left unstructured");
            rep.metadata.insert("skipped_lines".into(), skipped.to_string());
        }
        rep.finish()
    }
}
