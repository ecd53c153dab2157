use crate::container::format::{ARCHIVE_HEADER_LEN, BLOCK_HEADER_LEN, BLOCK_MAGIC};
use crate::*;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rdx_core::config::CompressionConfig;
use rdx_core::ErrorKind;
use rdx_lcm::{LcmDatabase, LcmStore};
use rdx_parser::{ParsedField, ParsedRepresentation, Span};
use rdx_schema::{BuiltinSchema, FieldKind, SchemaRegistry};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn setup() -> (Arc<LcmDatabase>, CompressionEngine) {
    let store = Arc::new(LcmDatabase::in_memory());
    let registry = Arc::new(SchemaRegistry::new(store.clone()).unwrap());
    let engine = CompressionEngine::new(store.clone(), registry, CompressionConfig::default()).unwrap();
    (store, engine)
}

fn entry_for(name: &str, cf: &CompressedFile) -> ArchiveEntry {
    ArchiveEntry {
        name: name.to_string(),
        original_size: cf.result.original_size,
        structural_size: cf.structural.len() as u64,
        residual_size: cf.residual.len() as u64,
        schema_id: cf.result.schema_id,
        file_type_id: cf.result.file_type_id,
        offset: ARCHIVE_HEADER_LEN,
        block_size: BLOCK_HEADER_LEN + cf.structural.len() as u64 + cf.residual.len() as u64,
    }
}

fn roundtrip(engine: &CompressionEngine, name: &str, data: &[u8]) -> CompressedFile {
    let cf = engine.compress_bytes(Path::new(name), data).unwrap();
    let out = DecompressionEngine::new()
        .decompress(&entry_for(name, &cf), &cf.structural, &cf.residual)
        .unwrap();
    assert_eq!(out, data, "round trip of {name}");
    cf
}

fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    // keep clear of the MZ / JSON / PK magic
    data[0] = 0xFF;
    data
}

fn tiny_pe() -> Vec<u8> {
    let mut data = vec![0u8; 0x200];
    data[0] = b'M';
    data[1] = b'Z';
    data[60..64].copy_from_slice(&0x80u32.to_le_bytes());
    data[0x80..0x84].copy_from_slice(b"PE\0\0");
    data[0x84..0x86].copy_from_slice(&0x14cu16.to_le_bytes());
    data[0x86..0x88].copy_from_slice(&1u16.to_le_bytes());
    let sec = 0x80 + 24;
    data[sec..sec + 5].copy_from_slice(b".text");
    data[sec + 16..sec + 20].copy_from_slice(&0x10u32.to_le_bytes());
    data[sec + 20..sec + 24].copy_from_slice(&0x100u32.to_le_bytes());
    data[0x100..0x110].copy_from_slice(&[0xC3; 16]);
    data
}

fn tlv() -> Vec<u8> {
    let mut data = Vec::new();
    for (ty, payload) in [(1u32, &b"alpha"[..]), (2, b"be"), (3, b"")] {
        data.extend_from_slice(&ty.to_le_bytes());
        data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        data.extend_from_slice(payload);
    }
    data.extend_from_slice(&[9, 0, 0]);
    data
}

fn fixtures() -> Vec<(&'static str, Vec<u8>, BuiltinSchema)> {
    vec![
        ("app.exe", tiny_pe(), BuiltinSchema::Pe32),
        (
            "data.json",
            br#"{"name": "rdx", "sizes": [1, -2.5e3, true, null], "nested": {"k": "v\"q"}}"#.to_vec(),
            BuiltinSchema::JsonGeneric,
        ),
        (
            "app.log",
            b"2024-01-02 03:04:05 INFO [core] started\nnot a structured line\n2024-01-02T03:04:06 WARN [net] slow\n"
                .to_vec(),
            BuiltinSchema::LogLine,
        ),
        ("table.csv", b"a,b,c\n1,2,3\nshort,row\n4,5,6\n".to_vec(), BuiltinSchema::CsvSimple),
        (
            "conf.ini",
            b"# settings\n[main]\nkey = value\n\n; note\nport=8080\nbroken line\n".to_vec(),
            BuiltinSchema::KvConfig,
        ),
        ("frames.tlv", tlv(), BuiltinSchema::ChunkedBinary),
        ("blob.bin", random_bytes(4096, 7), BuiltinSchema::UnstructuredBinary),
    ]
}

// ========== Block codec ==========

#[test]
fn test_block_roundtrip() {
    let data = b"abcabcabcabcabcabcabcabcabcabc".repeat(50);
    let packed = block::compress(&data, 3).unwrap();
    assert!(packed.len() < data.len());
    assert_eq!(block::decompress(&packed).unwrap(), data);
    assert_eq!(block::decompress_exact(&packed, data.len()).unwrap(), data);
}

#[test]
fn test_block_exact_size_mismatch() {
    let packed = block::compress(b"hello world", 3).unwrap();
    assert_eq!(block::decompress_exact(&packed, 5).unwrap_err().kind(), ErrorKind::Codec);
    assert_eq!(block::decompress_exact(&packed, 20).unwrap_err().kind(), ErrorKind::Codec);
    assert_eq!(block::decompress(b"not a zstd frame").unwrap_err().kind(), ErrorKind::Codec);
}

// ========== Structural split ==========

#[test]
fn test_split_hello_world_log() {
    let (_, engine) = setup();
    let data = b"hello\nworld";
    let registry = engine.registry();
    let set = rdx_parser::ParserSet::from_registry(registry).unwrap();
    let detected = rdx_parser::detect(Path::new("hello.log"), data);
    let rep = rdx_parser::SchemaParser::parse(set.select(&detected, data), data);
    let id = registry.builtin_id(BuiltinSchema::LogLine);

    let split = structural::split(&rep, id, data);
    assert_eq!(split.leaves, 2);
    assert_eq!(split.residual, b"\n");
    assert_eq!(split.covered, 10);
    let merged = structural::merge(&split.structural, &split.residual, data.len()).unwrap();
    assert_eq!(merged, data);

    let (header, _) = structural::read_header(&split.structural).unwrap();
    assert_eq!(header.schema_id, id);
    assert_eq!(header.residual_len, 1);
    assert_eq!(header.leaf_count, 2);
}

fn blob_rep(engine: &CompressionEngine) -> ParsedRepresentation {
    ParsedRepresentation::new(engine.registry().builtin(BuiltinSchema::UnstructuredBinary).unwrap())
}

#[test]
fn test_split_drops_overlapping_leaves() {
    let (_, engine) = setup();
    let data = b"0123456789";
    let mut rep = blob_rep(&engine);
    rep.fields.push(ParsedField::bytes("blob", FieldKind::Bytes, &data[2..6], Some(Span::new(2, 4))));
    rep.fields.push(ParsedField::bytes("blob", FieldKind::Bytes, &data[4..8], Some(Span::new(4, 4))));
    let split = structural::split(&rep, 7, data);
    assert_eq!(split.leaves, 1);
    assert_eq!(split.residual, b"016789");
    assert_eq!(structural::merge(&split.structural, &split.residual, 10).unwrap(), data);
}

#[test]
fn test_split_skips_leaf_that_does_not_reproduce() {
    let (_, engine) = setup();
    let data = b"abcdef";
    let mut rep = blob_rep(&engine);
    rep.fields.push(ParsedField::bytes("blob", FieldKind::Bytes, b"zzz", Some(Span::new(0, 3))));
    rep.fields.push(ParsedField::bytes("blob", FieldKind::Bytes, b"ef", Some(Span::new(4, 9))));
    rep.fields.push(ParsedField::text("blob", FieldKind::Bytes, "cd", None));
    let split = structural::split(&rep, 7, data);
    assert_eq!(split.leaves, 0);
    assert_eq!(split.residual, data);
    assert!(split.field_stats.is_empty());
}

#[test]
fn test_split_integer_leaf_width() {
    let (_, engine) = setup();
    let data = [0x4D, 0x5A, 0x00, 0x01];
    let mut rep = blob_rep(&engine);
    rep.fields.push(ParsedField::integer("blob", FieldKind::Integer, 0x5A4D, Span::new(0, 2)));
    rep.fields.push(ParsedField::integer("blob", FieldKind::Integer, 0x0100, Span::new(2, 2)));
    let split = structural::split(&rep, 7, &data);
    assert_eq!(split.leaves, 2);
    assert!(split.residual.is_empty());
    assert_eq!(structural::merge(&split.structural, &split.residual, 4).unwrap(), data);
}

#[test]
fn test_merge_rejects_bad_streams() {
    let (_, engine) = setup();
    let data = b"0123456789";
    let mut rep = blob_rep(&engine);
    rep.fields.push(ParsedField::bytes("blob", FieldKind::Bytes, &data[3..5], Some(Span::new(3, 2))));
    let split = structural::split(&rep, 7, data);

    let err = structural::merge(&split.structural, &split.residual, 11).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Codec);
    let err = structural::merge(&split.structural, &split.residual[1..], 9).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Codec);

    let mut trailing = split.structural.clone();
    trailing.append_byte(0);
    assert!(structural::merge(&trailing, &split.residual, 10).is_err());

    let mut versioned = split.structural.clone();
    versioned[0] = 99;
    assert!(structural::merge(&versioned, &split.residual, 10).is_err());

    assert!(structural::merge(&[], &split.residual, 10).is_err());
    let truncated = &split.structural[..split.structural.len() - 1];
    assert!(structural::merge(truncated, &split.residual, 10).is_err());
}

// ========== Engines ==========

#[test]
fn test_roundtrip_every_file_type() {
    let (_, engine) = setup();
    for (name, data, schema) in fixtures() {
        let cf = roundtrip(&engine, name, &data);
        assert_eq!(cf.result.schema_id, engine.registry().builtin_id(schema), "{name}");
        assert_eq!(cf.result.original_size, data.len() as u64);
    }
}

#[test]
fn test_structure_moves_bytes_out_of_residual() {
    let (_, engine) = setup();
    let data = b"2024-01-02 03:04:05 INFO [core] started\n".repeat(20);
    let cf = roundtrip(&engine, "svc.log", &data);
    assert_eq!(cf.result.leaves, 80);
    let residual = block::decompress(&cf.residual).unwrap();
    assert!(residual.len() < data.len() / 2);
}

#[test]
fn test_unstructured_is_all_structural() {
    let (_, engine) = setup();
    let data = random_bytes(1000, 3);
    let cf = roundtrip(&engine, "noise.bin", &data);
    assert_eq!(cf.result.leaves, 1);
    assert!(block::decompress(&cf.residual).unwrap().is_empty());
}

#[test]
fn test_empty_file_ratio() {
    let (_, engine) = setup();
    let cf = roundtrip(&engine, "empty.bin", b"");
    assert_eq!(cf.result.original_size, 0);
    assert_eq!(cf.result.ratio(), 1.0);
    assert_eq!(cf.result.leaves, 0);
}

#[test]
fn test_ratio_counts_both_streams() {
    let result = CompressionResult {
        original_size: 200,
        structural_size: 30,
        residual_size: 20,
        schema_id: 1,
        file_type_id: 1,
        leaves: 0,
    };
    assert_eq!(result.compressed_size(), 50);
    assert!((result.ratio() - 0.25).abs() < 1e-9);
}

#[test]
fn test_engine_records_corpus() {
    let (store, engine) = setup();
    let data = random_bytes(150_000, 11);
    let first = engine.compress_bytes(Path::new("big.bin"), &data).unwrap();

    let chunks = store.chunks_for_file(first.file_id).unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[2].info.length_bytes, 150_000 - 2 * 65_536);
    assert!(chunks.iter().all(|c| c.info.seen_count == 1));
    let file = store.file(first.file_id).unwrap().unwrap();
    assert_eq!(file.info.size_bytes, 150_000);
    assert_eq!(file.info.content_hash, rdx_core::hash::content_hash(&data));
    assert_eq!(store.file_type_name(first.result.file_type_id).unwrap().as_deref(), Some("unstructured_binary"));

    let stats = store.schema_stats(first.result.schema_id).unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].field_name, "blob");
    let blob: serde_json::Value = serde_json::from_str(&stats[0].stats_blob).unwrap();
    assert_eq!(blob["bytes"], 150_000);

    let again = engine.compress_bytes(Path::new("copy.bin"), &data).unwrap();
    assert_eq!(again.file_id, first.file_id);
    let chunks = store.chunks_for_file(first.file_id).unwrap();
    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(|c| c.info.seen_count == 2));
    let top = store.top_schemas_by_usage(1).unwrap();
    assert_eq!(top[0].schema_id, first.result.schema_id);
    assert_eq!(top[0].usage_count, 2);
    assert_eq!(store.total_files_tracked().unwrap(), 1);
}

#[test]
fn test_compress_missing_file_is_io() {
    let (_, engine) = setup();
    let err = engine.compress_file(Path::new("/nonexistent/rdx/input.log")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_decompress_rejects_schema_mismatch() {
    let (_, engine) = setup();
    let cf = engine.compress_bytes(Path::new("a.csv"), b"x,y\n1,2\n").unwrap();
    let mut entry = entry_for("a.csv", &cf);
    entry.schema_id += 1;
    let err = DecompressionEngine::new()
        .decompress(&entry, &cf.structural, &cf.residual)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Codec);
}

#[test]
fn test_decompress_rejects_wrong_original_size() {
    let (_, engine) = setup();
    let cf = engine.compress_bytes(Path::new("a.csv"), b"x,y\n1,2\n").unwrap();
    let mut entry = entry_for("a.csv", &cf);
    entry.original_size += 1;
    let err = DecompressionEngine::new()
        .decompress(&entry, &cf.structural, &cf.residual)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Codec);
}

// ========== Container ==========

fn write_inputs(dir: &TempDir) -> Vec<(std::path::PathBuf, Vec<u8>)> {
    fixtures()
        .into_iter()
        .take(3)
        .map(|(name, data, _)| {
            let path = dir.path().join(name);
            std::fs::write(&path, &data).unwrap();
            (path, data)
        })
        .collect()
}

#[test]
fn test_archive_index_integrity() {
    let (_, engine) = setup();
    let dir = TempDir::new().unwrap();
    let inputs = write_inputs(&dir);
    let archive = dir.path().join("out.rdx");

    let mut writer = ArchiveWriter::create(&archive).unwrap();
    for (path, _) in &inputs {
        writer.add_file(path, &engine, None).unwrap();
    }
    let written = writer.finalize().unwrap();
    assert_eq!(written.len(), 3);

    let raw = std::fs::read(&archive).unwrap();
    let reader = ArchiveReader::open(&archive).unwrap();
    let names: Vec<&str> = reader.entries().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["app.exe", "data.json", "app.log"]);
    assert_eq!(reader.list_entries(), written);
    let index_offset = reader.header().index_offset as u64;
    for entry in reader.entries() {
        let at = entry.offset as usize;
        assert_eq!(&raw[at..at + 4], &BLOCK_MAGIC.to_le_bytes());
        assert!(entry.offset + entry.block_size <= index_offset);
        assert_eq!(entry.block_size, BLOCK_HEADER_LEN + entry.structural_size + entry.residual_size);
    }

    let decoder = DecompressionEngine::new();
    let second = reader.find("data.json").unwrap();
    assert_eq!(reader.extract_to_vec(second, &decoder).unwrap(), inputs[1].1);
    let out = dir.path().join("restored").join("app.log");
    reader.extract_entry(&reader.entries()[2], &out, &decoder).unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), inputs[2].1);
    assert_eq!(reader.extract_to_vec(&reader.entries()[0], &decoder).unwrap(), inputs[0].1);
}

#[test]
fn test_archive_name_override_and_append() {
    let (_, engine) = setup();
    let dir = TempDir::new().unwrap();
    let inputs = write_inputs(&dir);
    let archive = dir.path().join("named.rdx");

    let mut writer = ArchiveWriter::create(&archive).unwrap();
    writer.add_file(&inputs[0].0, &engine, Some("renamed.exe")).unwrap();
    let cf = engine.compress_bytes(Path::new("mem.log"), b"in memory\n").unwrap();
    writer.append("mem.log", &cf).unwrap();
    assert_eq!(writer.entries().len(), 2);
    writer.finalize().unwrap();

    let reader = ArchiveReader::open(&archive).unwrap();
    assert!(reader.find("app.exe").is_none());
    let entry = reader.find("mem.log").unwrap();
    assert_eq!(reader.extract_to_vec(entry, &DecompressionEngine::new()).unwrap(), b"in memory\n");
}

#[test]
fn test_empty_archive() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("empty.rdx");
    ArchiveWriter::create(&archive).unwrap().finalize().unwrap();
    let reader = ArchiveReader::open(&archive).unwrap();
    assert!(reader.entries().is_empty());
    assert_eq!(std::fs::metadata(&archive).unwrap().len(), ARCHIVE_HEADER_LEN + 4);
}

#[test]
fn test_drop_finalizes() {
    let (_, engine) = setup();
    let dir = TempDir::new().unwrap();
    let inputs = write_inputs(&dir);
    let archive = dir.path().join("dropped.rdx");
    {
        let mut writer = ArchiveWriter::create(&archive).unwrap();
        writer.add_file(&inputs[2].0, &engine, None).unwrap();
    }
    let reader = ArchiveReader::open(&archive).unwrap();
    assert_eq!(reader.entries().len(), 1);
}

#[test]
fn test_cancelled_and_failed_files_leave_no_entry() {
    let (store, engine) = setup();
    let dir = TempDir::new().unwrap();
    let inputs = write_inputs(&dir);
    let archive = dir.path().join("partial.rdx");
    let cancel = AtomicBool::new(true);

    let mut writer = ArchiveWriter::create(&archive).unwrap();
    let err = writer
        .add_file_cancellable(&inputs[0].0, &engine, None, &cancel)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    let err = writer
        .add_file(&dir.path().join("missing.log"), &engine, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(writer.entries().is_empty());
    assert_eq!(store.total_files_tracked().unwrap(), 0);

    cancel.store(false, Ordering::Relaxed);
    writer
        .add_file_cancellable(&inputs[1].0, &engine, None, &cancel)
        .unwrap();
    writer.finalize().unwrap();
    assert_eq!(store.total_files_tracked().unwrap(), 1);

    let reader = ArchiveReader::open(&archive).unwrap();
    assert_eq!(reader.entries().len(), 1);
    assert_eq!(reader.entries()[0].offset, ARCHIVE_HEADER_LEN);
    assert_eq!(
        reader.extract_to_vec(&reader.entries()[0], &DecompressionEngine::new()).unwrap(),
        inputs[1].1
    );
}

#[test]
fn test_open_rejects_bad_magic() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bogus.rdx");
    std::fs::write(&path, [0u8; 64]).unwrap();
    let err = ArchiveReader::open(&path).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Format);

    std::fs::write(&path, b"RDX").unwrap();
    assert_eq!(ArchiveReader::open(&path).err().unwrap().kind(), ErrorKind::Format);
    let missing = ArchiveReader::open(&dir.path().join("nope.rdx")).err().unwrap();
    assert_eq!(missing.kind(), ErrorKind::Io);
}

#[test]
fn test_open_rejects_truncated_index() {
    let (_, engine) = setup();
    let dir = TempDir::new().unwrap();
    let inputs = write_inputs(&dir);
    let archive = dir.path().join("cut.rdx");
    let mut writer = ArchiveWriter::create(&archive).unwrap();
    for (path, _) in &inputs {
        writer.add_file(path, &engine, None).unwrap();
    }
    writer.finalize().unwrap();

    let raw = std::fs::read(&archive).unwrap();
    std::fs::write(&archive, &raw[..raw.len() - 10]).unwrap();
    assert_eq!(ArchiveReader::open(&archive).err().unwrap().kind(), ErrorKind::Format);

    let mut bad_offset = raw.clone();
    bad_offset[8..16].copy_from_slice(&(raw.len() as i64 + 100).to_le_bytes());
    std::fs::write(&archive, &bad_offset).unwrap();
    assert_eq!(ArchiveReader::open(&archive).err().unwrap().kind(), ErrorKind::Format);
}

#[test]
fn test_read_block_returns_appended_streams() {
    let (_, engine) = setup();
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("streams.rdx");
    let cf = engine
        .compress_bytes(Path::new("t.csv"), b"k,v\na,1\nb,2\n")
        .unwrap();
    let mut writer = ArchiveWriter::create(&archive).unwrap();
    writer.append("t.csv", &cf).unwrap();
    writer.finalize().unwrap();

    let reader = ArchiveReader::open(&archive).unwrap();
    let (structural, residual) = reader.read_block(&reader.entries()[0]).unwrap();
    assert_eq!(structural, cf.structural);
    assert_eq!(residual, cf.residual);
    let merged = DecompressionEngine::new()
        .decompress(&reader.entries()[0], &structural, &residual)
        .unwrap();
    assert_eq!(merged, b"k,v\na,1\nb,2\n");
}

#[test]
fn test_read_block_checks_block_magic() {
    let (_, engine) = setup();
    let dir = TempDir::new().unwrap();
    let inputs = write_inputs(&dir);
    let archive = dir.path().join("flipped.rdx");
    let mut writer = ArchiveWriter::create(&archive).unwrap();
    writer.add_file(&inputs[0].0, &engine, None).unwrap();
    writer.add_file(&inputs[1].0, &engine, None).unwrap();
    let entries = writer.finalize().unwrap();

    let mut raw = std::fs::read(&archive).unwrap();
    raw[entries[1].offset as usize] ^= 0xFF;
    std::fs::write(&archive, &raw).unwrap();

    let reader = ArchiveReader::open(&archive).unwrap();
    let decoder = DecompressionEngine::new();
    assert_eq!(
        reader.extract_to_vec(&reader.entries()[1], &decoder).unwrap_err().kind(),
        ErrorKind::Format
    );
    assert_eq!(reader.extract_to_vec(&reader.entries()[0], &decoder).unwrap(), inputs[0].1);
}
