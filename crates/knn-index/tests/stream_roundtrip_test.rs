//! Store and load indexes through managed streams.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor};

use knn_index::format::{FORMAT_VERSION, MAX_DIMENSION};
use knn_index::{
    init_shared_state, is_shared_state_required, load_index_with_stream,
    load_index_with_stream_adc, set_shared_state, write_index, FlatIndex, IndexError,
    IndexHeader, LoadOptions, Query, Storage, StoreOptions,
};
use knn_stream::StreamError;
use knn_runtime::{LocalRuntime, SharedBuffer, VectorSupply};
use knn_types::{Metric, Settings, VectorEncoding};
use pretty_assertions::assert_eq;
use rand::Rng;
use tempfile::TempDir;

fn random_vectors(count: usize, dim: usize) -> Vec<Vec<f32>> {
    let mut rng = rand::rng();
    (0..count)
        .map(|_| (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect())
        .collect()
}

fn float_index(metric: Metric, vectors: &[Vec<f32>]) -> FlatIndex {
    let mut index = FlatIndex::new(vectors[0].len(), metric, VectorEncoding::Float32).unwrap();
    for (id, v) in vectors.iter().enumerate() {
        index.add_float(id as i64 * 10, v).unwrap();
    }
    index
}

fn store(runtime: &LocalRuntime, index: &FlatIndex, options: &StoreOptions) -> Vec<u8> {
    let sink = SharedBuffer::new();
    let output = runtime.register_output(sink.clone());
    let env = runtime.attach();
    write_index(&env, Some(output), index, options).unwrap();
    runtime.unregister(output);
    sink.contents()
}

#[test]
fn test_file_backed_round_trip() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("index.knnf");
    let vectors = random_vectors(50, 16);
    let index = float_index(Metric::InnerProduct, &vectors);

    let settings = Settings::default();
    let runtime = LocalRuntime::from_settings(&settings.runtime);
    {
        let output = runtime.register_output(BufWriter::new(File::create(&path).unwrap()));
        let env = runtime.attach();
        write_index(&env, Some(output), &index, &StoreOptions::from_settings(&settings)).unwrap();
        runtime.unregister(output);
    }

    let input = runtime.register_input(BufReader::new(File::open(&path).unwrap()));
    let env = runtime.attach();
    let loaded =
        load_index_with_stream(&env, Some(input), &LoadOptions::from_settings(&settings)).unwrap();

    assert_eq!(loaded.ids(), index.ids());
    assert_eq!(loaded.vector(17), index.vector(17));
    let query = &vectors[3];
    assert_eq!(
        loaded.search(Query::Float(query), 5).unwrap(),
        index.search(Query::Float(query), 5).unwrap()
    );
}

#[test]
fn test_external_vectors_replayed() {
    let vectors = random_vectors(20, 8);
    let index = float_index(Metric::InnerProduct, &vectors);
    let runtime = LocalRuntime::new();
    let bytes = store(&runtime, &index, &StoreOptions::default().with_external_vectors(true));

    let input = runtime
        .register_input_with_vectors(Cursor::new(bytes), VectorSupply::Float(vectors.clone()));
    let env = runtime.attach();
    let loaded = load_index_with_stream(&env, Some(input), &LoadOptions::default()).unwrap();

    for (position, v) in vectors.iter().enumerate() {
        assert_eq!(loaded.vector(position).as_ref(), Some(v));
    }
    assert_eq!(runtime.calls("getFullPrecisionVectors"), 1);
    assert_eq!(runtime.calls("nextFloatVector"), 20);
    assert_eq!(runtime.stats().live_durable_refs, 0);
}

#[test]
fn test_int8_codes_need_adc_for_float_queries() {
    let mut index = FlatIndex::new(3, Metric::InnerProduct, VectorEncoding::Int8).unwrap();
    index.add_int8(1, &[1, -2, 3]).unwrap();
    index.add_int8(2, &[-4, 5, -6]).unwrap();
    let runtime = LocalRuntime::new();
    let bytes = store(&runtime, &index, &StoreOptions::default());

    let env = runtime.attach();
    let plain = load_index_with_stream(
        &env,
        Some(runtime.register_input(Cursor::new(bytes.clone()))),
        &LoadOptions::default(),
    )
    .unwrap();
    assert_eq!(plain.encoding(), VectorEncoding::Int8);
    assert!(matches!(
        plain.search(Query::Float(&[1.0, 0.0, 0.0]), 1),
        Err(IndexError::AdcRequired)
    ));

    let adc = load_index_with_stream_adc(
        &env,
        Some(runtime.register_input(Cursor::new(bytes))),
        &LoadOptions::default(),
    )
    .unwrap();
    assert!(adc.is_adc());
    assert_eq!(adc.vector(0), Some(vec![1.0, -2.0, 3.0]));
    let results = adc.search(Query::Float(&[0.5, 0.0, 0.0]), 2).unwrap();
    assert_eq!(results[0].id, 1);
    assert_eq!(results[0].score, 0.5);
}

#[test]
fn test_external_int8_widened_on_adc_load() {
    let mut index = FlatIndex::new(3, Metric::InnerProduct, VectorEncoding::Int8).unwrap();
    index.add_int8(9, &[1, -2, 3]).unwrap();
    let runtime = LocalRuntime::new();
    let bytes = store(&runtime, &index, &StoreOptions::default().with_external_vectors(true));

    let env = runtime.attach();
    let input = runtime.register_input_with_vectors(
        Cursor::new(bytes.clone()),
        VectorSupply::Int8(vec![vec![1, -2, 3]]),
    );
    let adc = load_index_with_stream_adc(&env, Some(input), &LoadOptions::default()).unwrap();
    assert_eq!(adc.encoding(), VectorEncoding::Float32);
    assert_eq!(adc.vector(0), Some(vec![1.0, -2.0, 3.0]));

    let input = runtime.register_input_with_vectors(
        Cursor::new(bytes),
        VectorSupply::Int8(vec![vec![1, -2, 3]]),
    );
    let plain = load_index_with_stream(&env, Some(input), &LoadOptions::default()).unwrap();
    assert_eq!(plain.encoding(), VectorEncoding::Int8);
    assert_eq!(plain.vector(0), Some(vec![1.0, -2.0, 3.0]));
}

#[test]
fn test_missing_external_vectors_fail_load() {
    let vectors = random_vectors(4, 4);
    let index = float_index(Metric::InnerProduct, &vectors);
    let runtime = LocalRuntime::new();
    let bytes = store(&runtime, &index, &StoreOptions::default().with_external_vectors(true));

    let env = runtime.attach();
    let input = runtime.register_input_with_vectors(
        Cursor::new(bytes),
        VectorSupply::Float(vectors[..2].to_vec()),
    );
    assert!(matches!(
        load_index_with_stream(&env, Some(input), &LoadOptions::default()),
        Err(IndexError::MissingVectors {
            loaded: 2,
            expected: 4
        })
    ));
    assert_eq!(runtime.stats().live_durable_refs, 0);
    assert_eq!(runtime.stats().pinned_buffers, 0);
}

#[test]
fn test_external_vectors_without_source_fail_load() {
    let index = float_index(Metric::InnerProduct, &random_vectors(2, 4));
    let runtime = LocalRuntime::new();
    let bytes = store(&runtime, &index, &StoreOptions::default().with_external_vectors(true));

    let env = runtime.attach();
    let input = runtime.register_input(Cursor::new(bytes));
    assert!(matches!(
        load_index_with_stream(&env, Some(input), &LoadOptions::default()),
        Err(IndexError::MissingVectors { loaded: 0, .. })
    ));
}

#[test]
fn test_l2_needs_shared_state_after_load() {
    let vectors = random_vectors(10, 4);
    let index = float_index(Metric::L2, &vectors);
    let runtime = LocalRuntime::new();
    let bytes = store(&runtime, &index, &StoreOptions::default());

    let env = runtime.attach();
    let mut loaded = load_index_with_stream(
        &env,
        Some(runtime.register_input(Cursor::new(bytes))),
        &LoadOptions::default(),
    )
    .unwrap();

    assert!(is_shared_state_required(&loaded));
    assert!(matches!(
        loaded.search(Query::Float(&vectors[0]), 1),
        Err(IndexError::SharedStateMissing)
    ));

    let state = init_shared_state(&loaded).unwrap();
    set_shared_state(&mut loaded, state).unwrap();
    let results = loaded.search(Query::Float(&vectors[6]), 1).unwrap();
    assert_eq!(results[0].id, 60);
    assert!(results[0].score.abs() < 1e-4);
}

#[test]
fn test_managed_failures_abort_operation() {
    let index = float_index(Metric::InnerProduct, &random_vectors(8, 4));
    let runtime = LocalRuntime::new();
    let env = runtime.attach();

    runtime.fail_after("write", 1, "disk full");
    let output = runtime.register_output(SharedBuffer::new());
    assert!(write_index(&env, Some(output), &index, &StoreOptions::default()).is_err());
    assert_eq!(runtime.calls("flush"), 0);
    runtime.clear_failures();

    let bytes = store(&runtime, &index, &StoreOptions::default());
    runtime.fail_after("read", 2, "stream closed");
    let input = runtime.register_input(Cursor::new(bytes));
    assert!(load_index_with_stream(&env, Some(input), &LoadOptions::default()).is_err());
}

fn header_only(dimension: u32, count: u64, storage: Storage) -> Vec<u8> {
    IndexHeader {
        version: FORMAT_VERSION,
        metric: Metric::InnerProduct,
        encoding: VectorEncoding::Float32,
        storage,
        dimension,
        count,
    }
    .encode()
    .to_vec()
}

#[test]
fn test_truncated_index_with_huge_count_fails_cleanly() {
    let runtime = LocalRuntime::new();
    let env = runtime.attach();
    let input = runtime.register_input(Cursor::new(header_only(1, 1 << 50, Storage::Inline)));
    assert!(matches!(
        load_index_with_stream(&env, Some(input), &LoadOptions::default()),
        Err(IndexError::Stream(StreamError::UnexpectedEof { copied: 0, .. }))
    ));
    assert_eq!(runtime.stats().live_local_refs, 0);
}

#[test]
fn test_oversized_dimension_rejected_before_replay() {
    let runtime = LocalRuntime::new();
    let env = runtime.attach();
    let input = runtime.register_input_with_vectors(
        Cursor::new(header_only(MAX_DIMENSION + 1, 1, Storage::External)),
        VectorSupply::Float(vec![vec![0.0; 4]]),
    );
    assert!(matches!(
        load_index_with_stream(&env, Some(input), &LoadOptions::default()),
        Err(IndexError::InvalidFormat(_))
    ));
    assert_eq!(runtime.calls("getFullPrecisionVectors"), 0);
}
