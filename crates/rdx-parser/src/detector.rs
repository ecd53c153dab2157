//! File-type detection from leading bytes, then extension.

use std::path::Path;

use rdx_core::types::{DetectedFileType, FileTypeTag};

const EXTENSIONS: &[(&[&str], FileTypeTag)] = &[
    (&["exe", "dll", "sys", "ocx", "drv"], FileTypeTag::Pe32),
    (&["json"], FileTypeTag::Json),
    (&["log", "txt"], FileTypeTag::LogLine),
    (&["csv", "tsv"], FileTypeTag::CsvSimple),
    (&["ini", "cfg", "properties", "conf", "env"], FileTypeTag::KvConfig),
    (&["tlv", "chunk"], FileTypeTag::ChunkedBinary),
];

/// Classify a file. Magic bytes win over the extension; anything unrecognised
/// is `unstructured_binary`. Never fails and only looks at `prefix`.
pub fn detect(path: &Path, prefix: &[u8]) -> DetectedFileType {
    detect_from_magic(prefix).unwrap_or_else(|| detect_from_extension(path))
}

pub fn detect_from_magic(prefix: &[u8]) -> Option<DetectedFileType> {
    if prefix.len() < 2 {
        return None;
    }
    match prefix {
        [b'M', b'Z', ..] => Some(DetectedFileType::new(FileTypeTag::Pe32, "magic:MZ")),
        [b'{' | b'[', ..] => Some(DetectedFileType::new(FileTypeTag::Json, "magic:json")),
        // ZIP family: too many container formats to guess from.
        [b'P', b'K', ..] => Some(DetectedFileType::new(FileTypeTag::UnstructuredBinary, "magic:PK")),
        _ => None,
    }
}

pub fn detect_from_extension(path: &Path) -> DetectedFileType {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let signature = if ext.is_empty() {
        "ext:".to_string()
    } else {
        format!("ext:.{ext}")
    };
    let tag = EXTENSIONS
        .iter()
        .find(|(exts, _)| exts.contains(&ext.as_str()))
        .map(|(_, tag)| *tag)
        .unwrap_or(FileTypeTag::UnstructuredBinary);
    DetectedFileType::new(tag, signature)
}
