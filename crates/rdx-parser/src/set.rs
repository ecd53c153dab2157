//! The closed parser family and priority-ordered selection.

use std::sync::Arc;

use rdx_core::types::DetectedFileType;
use rdx_core::Result;
use rdx_schema::{BuiltinSchema, SchemaDefinition, SchemaRegistry};

use crate::chunked::ChunkedBinaryParser;
use crate::csv::CsvParser;
use crate::json::JsonParser;
use crate::kv::KvConfigParser;
use crate::log::LogParser;
use crate::parsed::ParsedRepresentation;
use crate::pe::PeParser;
use crate::traits::SchemaParser;
use crate::unstructured::UnstructuredParser;

pub enum AnyParser {
    Pe(PeParser),
    Json(JsonParser),
    Log(LogParser),
    Csv(CsvParser),
    Kv(KvConfigParser),
    Chunked(ChunkedBinaryParser),
    Unstructured(UnstructuredParser),
}

impl AnyParser {
    fn inner(&self) -> &dyn SchemaParser {
        match self {
            Self::Pe(p) => p,
            Self::Json(p) => p,
            Self::Log(p) => p,
            Self::Csv(p) => p,
            Self::Kv(p) => p,
            Self::Chunked(p) => p,
            Self::Unstructured(p) => p,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pe(_) => "pe",
            Self::Json(_) => "json",
            Self::Log(_) => "log",
            Self::Csv(_) => "csv",
            Self::Kv(_) => "kv_config",
            Self::Chunked(_) => "chunked_binary",
            Self::Unstructured(_) => "unstructured",
        }
    }
}

impl SchemaParser for AnyParser {
    fn schema(&self) -> &Arc<SchemaDefinition> {
        self.inner().schema()
    }

    fn can_parse(&self, file_type: &DetectedFileType, prefix: &[u8]) -> bool {
        self.inner().can_parse(file_type, prefix)
    }

    fn parse(&self, data: &[u8]) -> ParsedRepresentation {
        self.inner().parse(data)
    }
}

/// Parsers in selection priority order, plus the unstructured fallback
/// which accepts everything.
pub struct ParserSet {
    ordered: Vec<AnyParser>,
    fallback: AnyParser,
}

impl ParserSet {
    pub fn from_registry(registry: &SchemaRegistry) -> Result<Self> {
        let schema = |b: BuiltinSchema| registry.builtin(b);
        Ok(Self {
            ordered: vec![
                AnyParser::Pe(PeParser::new(schema(BuiltinSchema::Pe32)?)),
                AnyParser::Json(JsonParser::new(schema(BuiltinSchema::JsonGeneric)?)),
                AnyParser::Log(LogParser::new(schema(BuiltinSchema::LogLine)?)),
                AnyParser::Csv(CsvParser::new(schema(BuiltinSchema::CsvSimple)?)),
                AnyParser::Kv(KvConfigParser::new(schema(BuiltinSchema::KvConfig)?)),
                AnyParser::Chunked(ChunkedBinaryParser::new(schema(BuiltinSchema::ChunkedBinary)?)),
            ],
            fallback: AnyParser::Unstructured(UnstructuredParser::new(schema(
                BuiltinSchema::UnstructuredBinary,
            )?)),
        })
    }

    /// First parser that claims the file, else the fallback.
    pub fn select(&self, file_type: &DetectedFileType, prefix: &[u8]) -> &AnyParser {
        self.ordered
            .iter()
            .find(|p| p.can_parse(file_type, prefix))
            .unwrap_or(&self.fallback)
    }

    /// All parsers in priority order, fallback last.
    pub fn parsers(&self) -> impl Iterator<Item = &AnyParser> {
        self.ordered.iter().chain(std::iter::once(&self.fallback))
    }
}
