//! JSON token scanner. Scalars become leaves; punctuation and whitespace stay
//! in the residual stream. A malformed tail stops the scan.

use std::sync::Arc;

use rdx_core::types::{DetectedFileType, FileTypeTag};
use rdx_schema::{FieldKind, SchemaDefinition};

use crate::parsed::{ParsedField, ParsedRepresentation, Span};
use crate::traits::SchemaParser;

pub struct JsonParser {
    schema: Arc<SchemaDefinition>,
}

impl JsonParser {
    pub fn new(schema: Arc<SchemaDefinition>) -> Self {
        Self { schema }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    String,
    Number,
    Bool,
    Null,
}

impl Token {
    fn type_name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::Null => "null",
        }
    }
}

fn root_type(data: &[u8]) -> &'static str {
    match data.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') => "object",
        Some(b'[') => "array",
        Some(b'"') => "string",
        Some(b'-' | b'0'..=b'9') => "number",
        Some(b't' | b'f') => "bool",
        Some(b'n') => "null",
        Some(_) => "unknown",
        None => "empty",
    }
}

/// End of the string token starting at `start` (a quote), exclusive.
fn scan_string(data: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < data.len() {
        match data[i] {
            b'\\' => i += 2,
            b'"' => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

fn scan_number(data: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < data.len() && matches!(data[i], b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') {
        i += 1;
    }
    i
}

const LITERALS: [(&[u8], Token); 3] = [
    (b"true", Token::Bool),
    (b"false", Token::Bool),
    (b"null", Token::Null),
];

fn scan_literal(data: &[u8], start: usize) -> Option<(Token, usize)> {
    let rest = &data[start..];
    for (lit, token) in LITERALS {
        if rest.starts_with(lit) {
            return Some((token, start + lit.len()));
        }
    }
    None
}

impl SchemaParser for JsonParser {
    fn schema(&self) -> &Arc<SchemaDefinition> {
        &self.schema
    }

    fn can_parse(&self, file_type: &DetectedFileType, prefix: &[u8]) -> bool {
        file_type.tag == FileTypeTag::Json || matches!(prefix.first(), Some(b'{' | b'['))
    }

    fn parse(&self, data: &[u8]) -> ParsedRepresentation {
        let mut rep = ParsedRepresentation::new(Arc::clone(&self.schema));
        rep.metadata.insert("root_type".into(), root_type(data).into());

        let mut i = 0usize;
        while i < data.len() {
            let b = data[i];
            let scanned = match b {
                b' ' | b'\t' | b'\r' | b'\n' | b'{' | b'}' | b'[' | b']' | b':' | b',' => {
                    i += 1;
                    continue;
                }
                b'"' => scan_string(data, i).map(|end| (Token::String, end)),
                b'-' | b'0'..=b'9' => Some((Token::Number, scan_number(data, i))),
                b't' | b'f' | b'n' => scan_literal(data, i),
                _ => None,
            };
            let Some((token, end)) = scanned else {
                tracing::debug!(offset = i, "Malformed JSON, remaining bytes left unstructured");
                rep.metadata.insert("malformed_at".into(), i.to_string());
                break;
            };
            rep.fields.push(ParsedField::record(
                "json_value",
                FieldKind::Record,
                vec![
                    ParsedField::text("type", FieldKind::Enum, token.type_name(), None),
                    ParsedField::bytes("value", FieldKind::Bytes, &data[i..end], Some(Span::new(i, end - i))),
                ],
            ));
            i = end;
        }
        rep.metadata.insert("tokens".into(), rep.fields.len().to_string());
        rep.finish()
    }
}
