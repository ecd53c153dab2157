//! End-to-end batches: files on disk in, archive out, and back.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rdx_codec::container::format::BLOCK_MAGIC;
use rdx_codec::ArchiveReader;
use rdx_core::hash::chunk_fingerprint;
use rdx_core::{ErrorKind, RdxConfig};
use rdx_lcm::LcmDatabase;
use rdx_schema::BuiltinSchema;
use rdx_service::{CancelToken, JobEvent, JobFailure, JobLog, JobObserver, JobOutcome, RdxService, Stage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn service_with(workers: usize) -> RdxService {
    let mut config = RdxConfig::default();
    config.batch.workers = workers;
    RdxService::new(Arc::new(LcmDatabase::in_memory()), config).unwrap()
}

fn service() -> RdxService {
    service_with(1)
}

fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, data).unwrap();
    path
}

fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data[0] = 0xFE;
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
    data[sec + 16..sec + 20].copy_from_slice(&0x40u32.to_le_bytes());
    data[sec + 20..sec + 24].copy_from_slice(&0x100u32.to_le_bytes());
    data[0x100..0x140].fill(0x90);
    data
}

fn seven_types() -> Vec<(&'static str, Vec<u8>)> {
    let mut tlv = Vec::new();
    for i in 0..20u32 {
        let payload = format!("payload-{i}");
        tlv.extend_from_slice(&i.to_le_bytes());
        tlv.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        tlv.extend_from_slice(payload.as_bytes());
    }
    vec![
        ("image.dll", tiny_pe()),
        ("doc.json", br#"[{"id": 1, "ok": true}, {"id": 2, "ok": false, "note": null}]"#.to_vec()),
        (
            "server.log",
            b"2025-03-01 12:00:00 INFO [http] listening\n\xff\xfe raw bytes\n2025-03-01 12:00:01 ERROR [db] timeout\n"
                .to_vec(),
        ),
        ("people.csv", b"name\tage\nann\t31\nbob\t42\n".to_vec()),
        ("settings.cfg", b"; defaults\n[net]\nhost = example.org\nport=443\n".to_vec()),
        ("stream.chunk", tlv),
        ("random.dat", random_bytes(70_000, 5)),
    ]
}

struct CancelAfterFirst {
    token: CancelToken,
    log: JobLog,
}

impl JobObserver for CancelAfterFirst {
    fn on_start(&mut self, name: &str) {
        self.log.on_start(name);
    }

    fn on_success(&mut self, outcome: &JobOutcome) {
        self.token.cancel();
        self.log.on_success(outcome);
    }

    fn on_failure(&mut self, failure: &JobFailure) {
        self.log.on_failure(failure);
    }
}

/// Every failure event directly follows the start event of the same file.
fn assert_starts_precede_failures(log: &JobLog) {
    let events = log.events();
    for (i, event) in events.iter().enumerate() {
        if let JobEvent::Failed(failure) = event {
            assert!(i > 0, "failure for {} has no start", failure.name);
            assert!(
                matches!(&events[i - 1], JobEvent::Started { name } if *name == failure.name),
                "failure for {} not preceded by its start",
                failure.name
            );
        }
    }
}

// ============================================================
// Scenarios
// ============================================================

#[test]
fn test_hello_world_log() {
    let svc = service();
    let dir = TempDir::new().unwrap();
    let input = write(dir.path(), "hello.log", b"hello\nworld");
    let archive = dir.path().join("hello.rdx");

    let mut log = JobLog::new();
    let report = svc.compress(&[input], &archive, &mut log).unwrap();
    assert!(report.failed.is_empty());
    assert_eq!(log.events().len(), 2);
    assert!(matches!(&log.events()[0], JobEvent::Started { name } if name == "hello.log"));
    let outcome = log.successes().next().unwrap();
    assert_eq!(outcome.original_size, 11);
    assert_eq!(outcome.schema_id, svc.registry().builtin_id(BuiltinSchema::LogLine));
    assert_eq!(
        svc.store().file_type_name(outcome.file_type_id).unwrap().as_deref(),
        Some("log_line")
    );

    let out = dir.path().join("out");
    let report = svc.decompress(&archive, &out, &mut ()).unwrap();
    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(std::fs::read(out.join("hello.log")).unwrap(), b"hello\nworld");
}

#[test]
fn test_csv_schema_idempotent_and_counted() {
    let svc = service();
    let first = svc.registry().register(BuiltinSchema::CsvSimple.definition()).unwrap();
    let second = svc.registry().register(BuiltinSchema::CsvSimple.definition()).unwrap();
    assert_eq!(first, second);
    assert_eq!(svc.registry().schema_id("CSV_SIMPLE", 1), Some(first));

    let dir = TempDir::new().unwrap();
    let files = vec![
        write(dir.path(), "a.csv", b"x,y\n1,2\n3,4\n"),
        write(dir.path(), "b.csv", b"k,v\nalpha,beta\n"),
    ];
    let report = svc.compress(&files, &dir.path().join("csv.rdx"), &mut ()).unwrap();
    assert_eq!(report.succeeded.len(), 2);

    let top = svc.store().top_schemas_by_usage(1).unwrap();
    assert_eq!(top[0].schema_id, first);
    assert_eq!(top[0].name, "CSV_SIMPLE");
    assert!(top[0].usage_count >= 2);
    assert_eq!(svc.registry().list().len(), 7);
}

fn roundtrip_all(workers: usize) {
    let svc = service_with(workers);
    let dir = TempDir::new().unwrap();
    let inputs = seven_types();
    let files: Vec<PathBuf> = inputs.iter().map(|(n, d)| write(dir.path(), n, d)).collect();
    let archive = dir.path().join("all.rdx");

    let mut log = JobLog::new();
    let report = svc.compress(&files, &archive, &mut log).unwrap();
    assert!(report.failed.is_empty(), "{:?}", report.failed);
    let names: Vec<&str> = report.succeeded.iter().map(|o| o.name.as_str()).collect();
    let expected: Vec<&str> = inputs.iter().map(|(n, _)| *n).collect();
    assert_eq!(names, expected);

    let expected_schemas = [
        BuiltinSchema::Pe32,
        BuiltinSchema::JsonGeneric,
        BuiltinSchema::LogLine,
        BuiltinSchema::CsvSimple,
        BuiltinSchema::KvConfig,
        BuiltinSchema::ChunkedBinary,
        BuiltinSchema::UnstructuredBinary,
    ];
    for (outcome, schema) in report.succeeded.iter().zip(expected_schemas) {
        assert_eq!(outcome.schema_id, svc.registry().builtin_id(schema), "{}", outcome.name);
    }

    let out = dir.path().join("restored");
    let back = svc.decompress(&archive, &out, &mut ()).unwrap();
    assert_eq!(back.succeeded.len(), 7);
    for (name, data) in &inputs {
        assert_eq!(&std::fs::read(out.join(name)).unwrap(), data, "{name}");
    }
}

#[test]
fn test_roundtrip_every_type_sequential() {
    roundtrip_all(1);
}

#[test]
fn test_roundtrip_every_type_parallel() {
    roundtrip_all(4);
}

#[test]
fn test_archive_index_integrity() {
    let svc = service();
    let dir = TempDir::new().unwrap();
    let files = vec![
        write(dir.path(), "a.log", b"2025-01-01 00:00:00 INFO [a] one\n"),
        write(dir.path(), "b.json", b"{\"b\": 2}"),
        write(dir.path(), "c.ini", b"x=1\ny=2\n"),
    ];
    let archive = dir.path().join("abc.rdx");
    svc.compress(&files, &archive, &mut ()).unwrap();

    let raw = std::fs::read(&archive).unwrap();
    let reader = ArchiveReader::open(&archive).unwrap();
    let entries = reader.list_entries();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["a.log", "b.json", "c.ini"]);
    for entry in &entries {
        let start = entry.offset as usize;
        let end = start + entry.block_size as usize;
        assert!(end <= raw.len());
        assert_eq!(&raw[start..start + 4], &BLOCK_MAGIC.to_le_bytes());
    }

    // Extracting the last entry touches only its own block.
    let mut damaged = raw.clone();
    damaged[entries[0].offset as usize] ^= 0xFF;
    std::fs::write(&archive, &damaged).unwrap();
    let reader = ArchiveReader::open(&archive).unwrap();
    let decoder = rdx_codec::DecompressionEngine::new();
    assert_eq!(reader.extract_to_vec(&entries[2], &decoder).unwrap(), b"x=1\ny=2\n");
    assert!(reader.extract_to_vec(&entries[0], &decoder).is_err());
}

#[test]
fn test_chunking_determinism() {
    let svc = service();
    let dir = TempDir::new().unwrap();
    let data = random_bytes(200_000, 9);
    let exact = random_bytes(131_072, 10);
    let files = vec![
        write(dir.path(), "first.bin", &data),
        write(dir.path(), "exact.bin", &exact),
    ];
    svc.compress(&files, &dir.path().join("chunks.rdx"), &mut ()).unwrap();

    let store = svc.store();
    let file = store.find_file_by_content_hash(&rdx_core::hash::content_hash(&data)).unwrap().unwrap();
    let chunks = store.chunks_for_file(file.file_id).unwrap();
    assert_eq!(chunks.len(), 4);
    assert_eq!(chunks[3].info.length_bytes, 200_000 - 3 * 65_536);
    for chunk in &chunks {
        let start = chunk.info.offset_bytes as usize;
        let end = start + chunk.info.length_bytes as usize;
        assert_eq!(chunk.info.chunk_fingerprint, chunk_fingerprint(&data[start..end]));
        let matches = store.find_similar_chunks(chunk.info.chunk_fingerprint, 5).unwrap();
        assert!(matches.iter().any(|m| m.chunk_id == chunk.chunk_id && m.similarity == 1.0));
    }

    let file = store.find_file_by_content_hash(&rdx_core::hash::content_hash(&exact)).unwrap().unwrap();
    let chunks = store.chunks_for_file(file.file_id).unwrap();
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c.info.length_bytes == 65_536));

    // Same bytes under another name: same fingerprints, seen twice.
    let again = write(dir.path(), "second.bin", &data);
    svc.compress(&[again], &dir.path().join("again.rdx"), &mut ()).unwrap();
    let file = store.find_file_by_content_hash(&rdx_core::hash::content_hash(&data)).unwrap().unwrap();
    let rechunked = store.chunks_for_file(file.file_id).unwrap();
    assert_eq!(rechunked.len(), 4);
    assert!(rechunked.iter().all(|c| c.info.seen_count == 2));
}

// ============================================================
// Failures and cancellation
// ============================================================

#[test]
fn test_failed_file_does_not_abort_batch() {
    let svc = service();
    let dir = TempDir::new().unwrap();
    let files = vec![
        write(dir.path(), "ok1.log", b"first\n"),
        dir.path().join("missing.log"),
        write(dir.path(), "ok2.log", b"second\n"),
    ];
    let archive = dir.path().join("partial.rdx");
    let mut log = JobLog::new();
    let report = svc.compress(&files, &archive, &mut log).unwrap();

    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(report.failed.len(), 1);
    let failure = &report.failed[0];
    assert_eq!(failure.name, "missing.log");
    assert_eq!(failure.stage, Stage::Compress);
    assert_eq!(failure.kind, ErrorKind::Io);
    assert_eq!(log.events().len(), 6);

    let reader = ArchiveReader::open(&archive).unwrap();
    assert_eq!(reader.entries().len(), 2);

    let bundle_id = report.bundle_id.unwrap();
    let bundle = svc.store().bundle(bundle_id).unwrap().unwrap();
    assert_eq!(bundle.label, "partial.rdx");
    for name in ["ok1.log", "ok2.log"] {
        let bytes = std::fs::read(dir.path().join(name)).unwrap();
        let file = svc
            .store()
            .find_file_by_content_hash(&rdx_core::hash::content_hash(&bytes))
            .unwrap()
            .unwrap();
        assert_eq!(file.info.bundle_id, Some(bundle_id));
    }
}

#[test]
fn test_bundling_can_be_disabled() {
    let mut config = RdxConfig::default();
    config.batch.bundle_archives = false;
    let svc = RdxService::new(Arc::new(LcmDatabase::in_memory()), config).unwrap();
    let dir = TempDir::new().unwrap();
    let files = vec![write(dir.path(), "one.log", b"one\n")];
    let report = svc.compress(&files, &dir.path().join("nb.rdx"), &mut ()).unwrap();
    assert_eq!(report.succeeded.len(), 1);
    assert!(report.bundle_id.is_none());
}

#[test]
fn test_unreadable_archive_aborts() {
    let svc = service();
    let dir = TempDir::new().unwrap();
    let bogus = write(dir.path(), "bogus.rdx", b"definitely not an archive");
    let mut log = JobLog::new();
    let err = svc.decompress(&bogus, &dir.path().join("out"), &mut log).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(log.events().is_empty());

    let err = svc
        .decompress(&dir.path().join("absent.rdx"), &dir.path().join("out"), &mut log)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_cancel_stops_at_file_boundary() {
    let svc = service();
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..3)
        .map(|i| write(dir.path(), &format!("f{i}.log"), format!("line {i}\n").as_bytes()))
        .collect();
    let archive = dir.path().join("cancel.rdx");
    let mut observer = CancelAfterFirst {
        token: svc.cancel_token(),
        log: JobLog::new(),
    };
    let report = svc.compress(&files, &archive, &mut observer).unwrap();

    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.cancelled(), 2);
    assert!(report.failed.iter().all(|f| f.kind == ErrorKind::Cancelled));
    assert_eq!(observer.log.failures().count(), 2);
    assert_eq!(observer.log.events().len(), 6);
    assert_starts_precede_failures(&observer.log);

    let reader = ArchiveReader::open(&archive).unwrap();
    assert_eq!(reader.entries().len(), 1);
    assert_eq!(reader.entries()[0].name, "f0.log");
    assert_eq!(svc.store().total_files_tracked().unwrap(), 1);

    // The next batch starts with a fresh token.
    let out = dir.path().join("out");
    let back = svc.decompress(&archive, &out, &mut ()).unwrap();
    assert_eq!(back.succeeded.len(), 1);
}

#[test]
fn test_cancel_keeps_store_and_archive_in_step() {
    let svc = service_with(2);
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..4)
        .map(|i| write(dir.path(), &format!("w{i}.log"), format!("window line {i}\n").as_bytes()))
        .collect();
    let archive = dir.path().join("window.rdx");
    let mut observer = CancelAfterFirst {
        token: svc.cancel_token(),
        log: JobLog::new(),
    };
    let report = svc.compress(&files, &archive, &mut observer).unwrap();

    // The whole first window was compressed before the cancel, so both land.
    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(report.cancelled(), 2);
    assert!(report.failed.iter().all(|f| f.stage == Stage::Compress));
    assert_starts_precede_failures(&observer.log);

    let reader = ArchiveReader::open(&archive).unwrap();
    assert_eq!(reader.entries().len(), 2);
    assert_eq!(svc.store().total_files_tracked().unwrap(), 2);
    assert_eq!(svc.corpus_stats().unwrap().total_files, 2);
}

#[test]
fn test_cancelled_extract_reports_start_first() {
    let svc = service();
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..3)
        .map(|i| write(dir.path(), &format!("e{i}.log"), format!("entry {i}\n").as_bytes()))
        .collect();
    let archive = dir.path().join("extract.rdx");
    svc.compress(&files, &archive, &mut ()).unwrap();

    let mut observer = CancelAfterFirst {
        token: svc.cancel_token(),
        log: JobLog::new(),
    };
    let out = dir.path().join("out");
    let report = svc.decompress(&archive, &out, &mut observer).unwrap();
    assert_eq!(report.succeeded.len(), 1);
    assert_eq!(report.cancelled(), 2);
    assert!(report.failed.iter().all(|f| f.stage == Stage::Extract));
    assert_eq!(observer.log.events().len(), 6);
    assert_starts_precede_failures(&observer.log);
    assert!(out.join("e0.log").exists());
    assert!(!out.join("e1.log").exists());
}

#[test]
fn test_renamed_duplicate_skips_taken_names() {
    let svc = service();
    let dir = TempDir::new().unwrap();
    let files = vec![
        write(dir.path(), "x/2_a.txt", b"FIRST"),
        write(dir.path(), "y/a.txt", b"SECOND"),
        write(dir.path(), "z/a.txt", b"THIRD"),
    ];
    let archive = dir.path().join("taken.rdx");
    svc.compress(&files, &archive, &mut ()).unwrap();

    let out = dir.path().join("out");
    let report = svc.decompress(&archive, &out, &mut ()).unwrap();
    assert_eq!(report.succeeded.len(), 3);
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 3);
    assert_eq!(std::fs::read(out.join("2_a.txt")).unwrap(), b"FIRST");
    assert_eq!(std::fs::read(out.join("a.txt")).unwrap(), b"SECOND");
    assert_eq!(std::fs::read(out.join("2_1_a.txt")).unwrap(), b"THIRD");
}

#[test]
fn test_duplicate_entry_names_do_not_collide() {
    let svc = service();
    let dir = TempDir::new().unwrap();
    let files = vec![
        write(dir.path(), "a/notes.txt", b"from a\n"),
        write(dir.path(), "b/notes.txt", b"from b\n"),
    ];
    let archive = dir.path().join("dups.rdx");
    svc.compress(&files, &archive, &mut ()).unwrap();
    let out = dir.path().join("out");
    svc.decompress(&archive, &out, &mut ()).unwrap();
    assert_eq!(std::fs::read(out.join("notes.txt")).unwrap(), b"from a\n");
    assert_eq!(std::fs::read(out.join("1_notes.txt")).unwrap(), b"from b\n");
}

// ============================================================
// Corpus store
// ============================================================

#[test]
fn test_corpus_stats_after_batch() {
    let svc = service();
    let dir = TempDir::new().unwrap();
    let files = vec![
        write(dir.path(), "a.csv", b"h1,h2\n1,2\n"),
        write(dir.path(), "b.csv", b"h1,h2\n3,4\n"),
        write(dir.path(), "c.log", b"just text\n"),
    ];
    svc.compress(&files, &dir.path().join("s.rdx"), &mut ()).unwrap();

    let stats = svc.corpus_stats().unwrap();
    assert_eq!(stats.total_files, 3);
    assert_eq!(stats.total_bytes, 10 + 10 + 10);
    assert_eq!(stats.top_schemas[0].name, "CSV_SIMPLE");
    assert_eq!(stats.top_schemas[0].usage_count, 2);
    assert_eq!(stats.top_file_types[0].name, "csv_simple");
    assert_eq!(stats.top_file_types[0].file_count, 2);
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["total_files"], 3);
}

#[test]
fn test_journaled_store_survives_restart() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let mut config = RdxConfig::default();
    config.store.path = dir.path().join("corpus").join("lcm.journal");
    std::fs::create_dir_all(dir.path().join("corpus"))?;
    let input = write(dir.path(), "keep.log", b"2025-01-01 00:00:00 INFO [x] persisted\n");

    {
        let svc = RdxService::open(config.clone())?;
        svc.compress(&[input], &dir.path().join("p.rdx"), &mut ())?;
    }
    let svc = RdxService::open(config)?;
    let stats = svc.corpus_stats()?;
    assert_eq!(stats.total_files, 1);
    assert_eq!(stats.top_schemas[0].name, "LOG_LINE");
    assert_eq!(svc.registry().builtin_id(BuiltinSchema::LogLine), 3);
    Ok(())
}
