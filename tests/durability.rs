//! Durability and failure-mode tests: close/reopen round trips, on-disk
//! corruption rejection, config validation, and lock contention.

use std::fs;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

use tempfile::TempDir;
use vecgraph::{Database, Error, Metric, MetadataRecord, VecgraphConfig};

fn config(dimension: usize) -> VecgraphConfig {
    let mut cfg = VecgraphConfig::new(dimension);
    cfg.metric = Metric::L2;
    cfg.hnsw_m = 8;
    cfg.hnsw_ef_construction = 48;
    cfg.seed = 99;
    cfg
}

fn embedding(seed: u64, dim: usize) -> Vec<f32> {
    (0..dim).map(|i| (seed * 7 + i as u64) as f32).collect()
}

#[test]
fn close_then_reopen_preserves_every_vector_and_its_metadata() {
    let dir = TempDir::new().unwrap();
    let mut ids = Vec::new();
    {
        let db = Database::create(dir.path(), config(6)).unwrap();
        for i in 0..50u64 {
            let mut record = MetadataRecord::empty();
            record.asset_tag = Some(format!("tag-{i}"));
            ids.push(db.insert(&embedding(i, 6), record).unwrap());
        }
        db.close().unwrap();
    }

    let db = Database::open(dir.path()).unwrap();
    let stats = db.stats();
    assert_eq!(stats.live_count, 50);
    assert_eq!(stats.dimension, 6);

    for (i, &id) in ids.iter().enumerate() {
        let hits = db.search(&embedding(i as u64, 6), 1, Some(64), None).unwrap();
        assert_eq!(hits[0].id, id);
        assert_eq!(hits[0].metadata.asset_tag, Some(format!("tag-{i}")));
    }
}

#[test]
fn searches_are_deterministic_across_repeated_calls() {
    let dir = TempDir::new().unwrap();
    let db = Database::create(dir.path(), config(5)).unwrap();
    for i in 0..80u64 {
        db.insert(&embedding(i, 5), MetadataRecord::empty()).unwrap();
    }

    let query = embedding(17, 5);
    let first = db.search(&query, 10, Some(32), None).unwrap();
    let second = db.search(&query, 10, Some(32), None).unwrap();
    assert_eq!(
        first.iter().map(|h| h.id).collect::<Vec<_>>(),
        second.iter().map(|h| h.id).collect::<Vec<_>>()
    );
}

#[test]
fn identical_seed_and_insert_sequence_produce_byte_identical_files() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    for dir in [&dir_a, &dir_b] {
        let db = Database::create(dir.path(), config(6)).unwrap();
        for i in 0..40u64 {
            db.insert(&embedding(i, 6), MetadataRecord::empty()).unwrap();
        }
        db.close().unwrap();
    }

    let vectors_a = fs::read(dir_a.path().join("vectors.bin")).unwrap();
    let vectors_b = fs::read(dir_b.path().join("vectors.bin")).unwrap();
    assert_eq!(vectors_a, vectors_b);

    let index_a = fs::read(dir_a.path().join("index.hnsw")).unwrap();
    let index_b = fs::read(dir_b.path().join("index.hnsw")).unwrap();
    assert_eq!(index_a, index_b);
}

#[test]
fn reopen_rejects_a_truncated_vectors_file() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::create(dir.path(), config(4)).unwrap();
        db.insert(&embedding(0, 4), MetadataRecord::empty()).unwrap();
        db.close().unwrap();
    }

    let vectors_path = dir.path().join("vectors.bin");
    let mut file = OpenOptions::new().write(true).open(&vectors_path).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.write_all(&[0u8; 8]).unwrap();
    drop(file);

    assert!(matches!(Database::open(dir.path()), Err(Error::Corruption { .. })));
}

#[test]
fn reopen_rejects_a_bad_index_header() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::create(dir.path(), config(4)).unwrap();
        db.insert(&embedding(0, 4), MetadataRecord::empty()).unwrap();
        db.close().unwrap();
    }

    let index_path = dir.path().join("index.hnsw");
    fs::write(&index_path, [0u8; 48]).unwrap();

    assert!(matches!(Database::open(dir.path()), Err(Error::Corruption { .. })));
}

#[test]
fn second_writer_on_the_same_directory_is_rejected() {
    let dir = TempDir::new().unwrap();
    let _first = Database::create(dir.path(), config(4)).unwrap();
    assert!(matches!(Database::open(dir.path()), Err(Error::Concurrency { .. })));
}

#[test]
fn zero_dimension_config_is_rejected_at_create() {
    let dir = TempDir::new().unwrap();
    let cfg = VecgraphConfig::new(0);
    assert!(matches!(Database::create(dir.path(), cfg), Err(Error::Config(_))));
}

#[test]
fn unknown_simd_override_is_rejected_before_any_file_is_written() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path()).unwrap();
    fs::write(dir.path().join("vecgraph.toml"), "simd_override = \"nonsense\"\n").unwrap();

    assert!(matches!(
        Database::create(dir.path(), config(4)),
        Err(Error::Config(_))
    ));
    assert!(!dir.path().join("vectors.bin").exists());
    assert!(!dir.path().join("lockfile").exists());
}
