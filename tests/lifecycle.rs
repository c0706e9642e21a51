//! End-to-end lifecycle tests: create, insert, search, filter, tombstone,
//! optimize, against the public `vecgraph` API only.

use tempfile::TempDir;
use vecgraph::{Bias, Database, Metric, MetadataRecord, NumericOp, Predicate, VecgraphConfig};

fn config(dimension: usize, metric: Metric) -> VecgraphConfig {
    let mut cfg = VecgraphConfig::new(dimension);
    cfg.metric = metric;
    cfg.hnsw_m = 8;
    cfg.hnsw_ef_construction = 48;
    cfg.seed = 1234;
    cfg
}

fn embedding(seed: u64, dim: usize) -> Vec<f32> {
    (0..dim)
        .map(|i| ((seed.wrapping_mul(2654435761).wrapping_add(i as u64)) % 1000) as f32 / 1000.0)
        .collect()
}

#[test]
fn l2_insert_and_exact_match_search() {
    let dir = TempDir::new().unwrap();
    let db = Database::create(dir.path(), config(8, Metric::L2)).unwrap();

    let mut ids = Vec::new();
    for i in 0..100u64 {
        let id = db.insert(&embedding(i, 8), MetadataRecord::empty()).unwrap();
        ids.push(id);
    }

    let query = embedding(42, 8);
    let hits = db.search(&query, 1, Some(64), None).unwrap();
    assert_eq!(hits[0].id, ids[42]);
}

#[test]
fn cosine_vectors_are_normalized_and_all_zero_is_rejected() {
    let dir = TempDir::new().unwrap();
    let db = Database::create(dir.path(), config(3, Metric::Cosine)).unwrap();

    db.insert(&[3.0, 0.0, 0.0], MetadataRecord::empty()).unwrap();
    let hits = db.search(&[1.0, 0.0, 0.0], 1, None, None).unwrap();
    assert!(hits[0].distance.abs() < 1e-5, "expected near-zero cosine distance, got {}", hits[0].distance);

    assert!(db.insert(&[0.0, 0.0, 0.0], MetadataRecord::empty()).is_err());
    assert!(db.search(&[0.0, 0.0, 0.0], 1, None, None).is_err());
}

#[test]
fn metadata_filters_compose_and_restrict_results() {
    let dir = TempDir::new().unwrap();
    let db = Database::create(dir.path(), config(4, Metric::L2)).unwrap();

    for i in 0..60u64 {
        let mut record = MetadataRecord::empty();
        record.doc_type = Some(if i % 2 == 0 { "journal" } else { "chart" }.into());
        record.bias = Some(if i % 3 == 0 { Bias::Left } else { Bias::Neutral });
        record.numeric.insert("confidence".into(), (i % 10) as f64 / 10.0);
        db.insert(&embedding(i, 4), record).unwrap();
    }

    let predicate = Predicate::And(vec![
        Predicate::DocType {
            value: "journal".into(),
        },
        Predicate::Numeric {
            field: "confidence".into(),
            op: NumericOp::Ge,
            value: 0.5,
        },
    ]);

    let hits = db
        .search(&embedding(0, 4), 10, Some(32), Some(&predicate))
        .unwrap();
    assert!(!hits.is_empty());
    for hit in &hits {
        assert_eq!(hit.metadata.doc_type.as_deref(), Some("journal"));
        assert!(hit.metadata.numeric_attr("confidence").unwrap() >= 0.5);
    }
}

#[test]
fn tombstone_then_optimize_reclaims_graph_and_log_space() {
    let dir = TempDir::new().unwrap();
    let db = Database::create(dir.path(), config(4, Metric::L2)).unwrap();

    let mut ids = Vec::new();
    for i in 0..40u64 {
        ids.push(db.insert(&embedding(i, 4), MetadataRecord::empty()).unwrap());
    }
    for &id in ids.iter().step_by(4) {
        db.tombstone(id).unwrap();
    }

    let before = db.stats();
    assert_eq!(before.tombstoned_count, 10);

    db.optimize().unwrap();

    let after = db.stats();
    assert_eq!(after.tombstoned_count, 0);
    assert_eq!(after.live_count, before.live_count);

    for &id in ids.iter().step_by(4) {
        assert!(db.tombstone(id).is_err(), "already-compacted id should no longer be tombstoneable");
    }
}

#[test]
fn search_with_k_larger_than_population_returns_everything_it_has() {
    let dir = TempDir::new().unwrap();
    let db = Database::create(dir.path(), config(4, Metric::L2)).unwrap();
    for i in 0..5u64 {
        db.insert(&embedding(i, 4), MetadataRecord::empty()).unwrap();
    }
    let hits = db.search(&embedding(0, 4), 50, None, None).unwrap();
    assert_eq!(hits.len(), 5);
}

#[test]
fn zero_k_is_rejected() {
    let dir = TempDir::new().unwrap();
    let db = Database::create(dir.path(), config(4, Metric::L2)).unwrap();
    db.insert(&embedding(0, 4), MetadataRecord::empty()).unwrap();
    assert!(db.search(&embedding(0, 4), 0, None, None).is_err());
}
