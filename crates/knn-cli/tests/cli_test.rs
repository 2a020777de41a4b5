//! End-to-end command tests against files on disk.

use std::path::Path;

use knn_cli::commands::{build_index, inspect_index, search_index, VectorRecord};
use knn_index::Storage;
use knn_types::{Metric, Settings, VectorEncoding};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn write_vectors(dir: &Path, records: &[VectorRecord]) -> std::path::PathBuf {
    let path = dir.join("vectors.json");
    std::fs::write(&path, serde_json::to_vec(records).unwrap()).unwrap();
    path
}

fn records() -> Vec<VectorRecord> {
    vec![
        VectorRecord { id: 1, vector: vec![1.0, 0.0, 0.0] },
        VectorRecord { id: 2, vector: vec![0.0, 2.0, 0.0] },
        VectorRecord { id: 3, vector: vec![-1.0, -1.0, 3.0] },
    ]
}

#[test]
fn test_build_inspect_search() {
    let temp = TempDir::new().unwrap();
    let vectors = write_vectors(temp.path(), &records());
    let index = temp.path().join("index.knnf");
    let settings = Settings::default();

    let summary = build_index(
        &settings,
        &vectors,
        &index,
        Metric::L2,
        VectorEncoding::Float32,
        false,
    )
    .unwrap();
    assert_eq!(summary.vectors, 3);
    assert_eq!(summary.dimension, 3);

    let header = inspect_index(&settings, &index).unwrap();
    assert_eq!(header.count, 3);
    assert_eq!(header.metric, Metric::L2);
    assert_eq!(header.storage, Storage::Inline);

    let results = search_index(&settings, &index, None, false, "0,1.9,0", 2).unwrap();
    let ids: Vec<i64> = results.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![2, 1]);
}

#[test]
fn test_external_int8_with_adc() {
    let temp = TempDir::new().unwrap();
    let vectors = write_vectors(temp.path(), &records());
    let index = temp.path().join("index.knnf");
    let settings = Settings::default();

    build_index(
        &settings,
        &vectors,
        &index,
        Metric::InnerProduct,
        VectorEncoding::Int8,
        true,
    )
    .unwrap();
    assert!(search_index(&settings, &index, None, true, "0,0,1", 1).is_err());

    let results = search_index(&settings, &index, Some(&vectors), true, "0,0,0.5", 1).unwrap();
    assert_eq!(results[0].id, 3);
    assert_eq!(results[0].score, 1.5);
}

#[test]
fn test_build_rejects_fractional_int8() {
    let temp = TempDir::new().unwrap();
    let vectors = write_vectors(
        temp.path(),
        &[VectorRecord { id: 1, vector: vec![0.5, 1.0] }],
    );
    let index = temp.path().join("index.knnf");
    assert!(build_index(
        &Settings::default(),
        &vectors,
        &index,
        Metric::InnerProduct,
        VectorEncoding::Int8,
        false
    )
    .is_err());
}
