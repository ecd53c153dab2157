//! The built-in schema catalogue.

use rdx_core::types::{FileTypeTag, SchemaId};

use crate::definition::{FieldConstraint, FieldKind, FieldSpec, SchemaDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinSchema {
    Pe32,
    JsonGeneric,
    LogLine,
    CsvSimple,
    KvConfig,
    ChunkedBinary,
    UnstructuredBinary,
}

impl BuiltinSchema {
    /// Registration order. A fresh store hands out ids 1..=7 in this order.
    pub const ALL: [BuiltinSchema; 7] = [
        Self::Pe32,
        Self::JsonGeneric,
        Self::LogLine,
        Self::CsvSimple,
        Self::KvConfig,
        Self::ChunkedBinary,
        Self::UnstructuredBinary,
    ];

    pub fn well_known_id(&self) -> SchemaId {
        match self {
            Self::Pe32 => 1,
            Self::JsonGeneric => 2,
            Self::LogLine => 3,
            Self::CsvSimple => 4,
            Self::KvConfig => 5,
            Self::ChunkedBinary => 6,
            Self::UnstructuredBinary => 7,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pe32 => "PE32",
            Self::JsonGeneric => "JSON_GENERIC",
            Self::LogLine => "LOG_LINE",
            Self::CsvSimple => "CSV_SIMPLE",
            Self::KvConfig => "KV_CONFIG",
            Self::ChunkedBinary => "CHUNKED_BINARY",
            Self::UnstructuredBinary => "UNSTRUCTURED_BINARY",
        }
    }

    pub fn for_file_type(tag: FileTypeTag) -> Self {
        match tag {
            FileTypeTag::Pe32 => Self::Pe32,
            FileTypeTag::Json => Self::JsonGeneric,
            FileTypeTag::LogLine => Self::LogLine,
            FileTypeTag::CsvSimple => Self::CsvSimple,
            FileTypeTag::KvConfig => Self::KvConfig,
            FileTypeTag::ChunkedBinary => Self::ChunkedBinary,
            FileTypeTag::UnstructuredBinary => Self::UnstructuredBinary,
        }
    }

    pub(crate) fn index(&self) -> usize {
        (self.well_known_id() - 1) as usize
    }

    /// Uncompiled definition.
    pub fn definition(&self) -> SchemaDefinition {
        use FieldKind as K;
        fn f(name: &str, kind: FieldKind) -> FieldSpec {
            FieldSpec::new(name, kind)
        }
        match self {
            Self::Pe32 => SchemaDefinition::new(
                self.name(),
                1,
                vec![
                    f("dos_header", K::Record).nested(vec![
                        f("e_magic", K::Integer).sized(2).constraint(FieldConstraint::Enumeration {
                            values: vec!["23117".into()],
                        }),
                        f("e_lfanew", K::Integer).sized(4),
                    ]),
                    f("pe_header", K::Record).nested(vec![
                        f("signature", K::Integer).sized(4),
                        f("machine", K::Integer).sized(2),
                        f("number_of_sections", K::Integer).sized(2),
                        f("time_date_stamp", K::Integer).sized(4),
                        f("size_of_optional_header", K::Integer).sized(2),
                        f("characteristics", K::Integer).sized(2),
                    ]),
                    f("sections", K::Array).nested(vec![
                        f("name", K::String).sized(8).encoding("ascii"),
                        f("virtual_size", K::Integer).sized(4),
                        f("virtual_address", K::Integer).sized(4),
                        f("size_of_raw_data", K::Integer).sized(4),
                        f("pointer_to_raw_data", K::OffsetOf).sized(4).refers_to("raw_data"),
                        f("raw_data", K::Bytes).refers_to("size_of_raw_data"),
                    ]),
                ],
            )
            .with_metadata("endianness", "little"),
            Self::JsonGeneric => SchemaDefinition::new(
                self.name(),
                1,
                vec![f("json_value", K::Record).nested(vec![
                    f("type", K::Enum).sized(1).constraint(FieldConstraint::Enumeration {
                        values: ["object", "array", "string", "number", "bool", "null"]
                            .iter()
                            .map(|s| s.to_string())
                            .collect(),
                    }),
                    f("value", K::Bytes),
                ])],
            ),
            Self::LogLine => SchemaDefinition::new(
                self.name(),
                1,
                vec![f("log_line", K::Record).nested(vec![
                    f("timestamp", K::String).encoding("iso8601"),
                    f("level", K::Enum),
                    f("component", K::String),
                    f("message", K::String),
                ])],
            ),
            Self::CsvSimple => SchemaDefinition::new(
                self.name(),
                1,
                vec![f("csv_table", K::Record).nested(vec![
                    f("header", K::Array).nested(vec![f("cell", K::String)]),
                    f("rows", K::Array).nested(vec![f("cell", K::String)]),
                ])],
            ),
            Self::KvConfig => SchemaDefinition::new(
                self.name(),
                1,
                vec![
                    f("section_header", K::String),
                    f("kv_entry", K::Record).nested(vec![
                        f("section", K::String),
                        f("key", K::String),
                        f("value", K::String),
                    ]),
                ],
            ),
            Self::ChunkedBinary => SchemaDefinition::new(
                self.name(),
                1,
                vec![f("chunk", K::Record).nested(vec![
                    f("type_id", K::Integer).sized(4),
                    f("length", K::LengthOf).sized(4).refers_to("payload"),
                    f("payload", K::Bytes).refers_to("length"),
                ])],
            )
            .with_metadata("endianness", "little"),
            Self::UnstructuredBinary => {
                SchemaDefinition::new(self.name(), 1, vec![f("blob", K::Bytes)])
            }
        }
    }
}
