use serde::{Deserialize, Serialize};

pub type SchemaId = i32;
pub type FileTypeId = i32;
pub type FileId = i64;
pub type ChunkId = i64;
pub type BundleId = i64;
pub type TokenProfileId = i64;
pub type VocabId = i64;
pub type GeneratorId = i64;

/// The closed set of file types the detector can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileTypeTag {
    Pe32,
    Json,
    LogLine,
    CsvSimple,
    KvConfig,
    ChunkedBinary,
    UnstructuredBinary,
}

impl FileTypeTag {
    pub const ALL: [FileTypeTag; 7] = [
        Self::Pe32,
        Self::Json,
        Self::LogLine,
        Self::CsvSimple,
        Self::KvConfig,
        Self::ChunkedBinary,
        Self::UnstructuredBinary,
    ];

    pub fn id(&self) -> FileTypeId {
        match self {
            Self::Pe32 => 1,
            Self::Json => 2,
            Self::LogLine => 3,
            Self::CsvSimple => 4,
            Self::KvConfig => 5,
            Self::ChunkedBinary => 6,
            Self::UnstructuredBinary => 7,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pe32 => "pe32",
            Self::Json => "json",
            Self::LogLine => "log_line",
            Self::CsvSimple => "csv_simple",
            Self::KvConfig => "kv_config",
            Self::ChunkedBinary => "chunked_binary",
            Self::UnstructuredBinary => "unstructured_binary",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }
}

impl std::fmt::Display for FileTypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Detector output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedFileType {
    pub tag: FileTypeTag,
    /// How the type was recognised, e.g. `magic:MZ` or `ext:.csv`.
    pub signature: String,
}

impl DetectedFileType {
    pub fn new(tag: FileTypeTag, signature: impl Into<String>) -> Self {
        Self { tag, signature: signature.into() }
    }

    pub fn type_id(&self) -> FileTypeId {
        self.tag.id()
    }

    pub fn name(&self) -> &'static str {
        self.tag.name()
    }
}
