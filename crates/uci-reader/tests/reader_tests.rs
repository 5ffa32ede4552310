// Tests for uci-reader: epochs, randomization, labels, cache, sources

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::{NamedTempFile, TempDir};
use uci_reader::{
    DataReader, EndDataType, Error, LabelKind, Minibatch, MinibatchLayout, Randomize,
    ReaderConfig, ReaderState, UciReader, REQUEST_DATA_SIZE,
};

// Fixtures

/// `n` records: features `[i, 10 * i]`, category label `c{i % 2}`.
fn write_data(path: &Path, n: usize) {
    let mut f = fs::File::create(path).unwrap();
    for i in 0..n {
        writeln!(f, "{i} {} c{}", i * 10, i % 2).unwrap();
    }
}

fn temp_data(n: usize) -> NamedTempFile {
    let f = NamedTempFile::new().unwrap();
    write_data(f.path(), n);
    f
}

fn config(path: &Path) -> ReaderConfig {
    ReaderConfig::new(path, 2).label_dim(2)
}

/// Record index (first feature) of every sample, per minibatch.
fn run_epoch(
    reader: &mut impl DataReader<f32>,
    mb_size: usize,
    epoch: usize,
    epoch_size: usize,
) -> Vec<Vec<usize>> {
    reader.start_minibatch_loop(mb_size, epoch, epoch_size).unwrap();
    let mut out = Minibatch::new();
    let mut batches = Vec::new();
    while reader.get_minibatch(&mut out).unwrap() {
        let features = &out["features"];
        batches.push(
            (0..features.cols())
                .map(|c| features.column(c)[0] as usize)
                .collect(),
        );
    }
    batches
}

fn flat(batches: &[Vec<usize>]) -> Vec<usize> {
    batches.iter().flatten().copied().collect()
}

// Epoch / minibatch bookkeeping

#[test]
fn test_ten_samples_partial_minibatch() {
    let f = temp_data(10);
    let mut r = UciReader::<f32>::new(config(f.path())).unwrap();
    let batches = run_epoch(&mut r, 3, 0, REQUEST_DATA_SIZE);
    let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![3, 3, 3, 1]);
    assert_eq!(flat(&batches), (0..10).collect::<Vec<_>>());
    assert_eq!(r.minibatch_layout(), MinibatchLayout::for_samples(1));
    assert!(r.data_end(EndDataType::Epoch));
    assert_eq!(r.state(), ReaderState::EpochExhausted);
}

#[test]
fn test_ten_samples_full_minibatches_only() {
    let f = temp_data(10);
    let mut r = UciReader::<f32>::new(config(f.path()).partial_minibatch(false)).unwrap();
    let batches = run_epoch(&mut r, 3, 0, REQUEST_DATA_SIZE);
    assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8]]);
    assert!(r.data_end(EndDataType::Epoch));
}

#[test]
fn test_epoch_larger_than_dataset_wraps() {
    let f = temp_data(10);
    let mut r = UciReader::<f32>::new(config(f.path())).unwrap();
    let batches = run_epoch(&mut r, 4, 0, 25);
    let expected: Vec<usize> = (0..25).map(|i| i % 10).collect();
    assert_eq!(flat(&batches), expected);
}

#[test]
fn test_short_epochs_walk_through_the_dataset() {
    let f = temp_data(10);
    let mut r = UciReader::<f32>::new(config(f.path())).unwrap();
    assert_eq!(flat(&run_epoch(&mut r, 2, 0, 4)), vec![0, 1, 2, 3]);
    assert_eq!(flat(&run_epoch(&mut r, 2, 1, 4)), vec![4, 5, 6, 7]);
    assert_eq!(flat(&run_epoch(&mut r, 2, 2, 4)), vec![8, 9, 0, 1]);
}

#[test]
fn test_next_epoch_reuses_resident_records() {
    let f = temp_data(6);
    let mut r = UciReader::<f32>::new(config(f.path())).unwrap();
    let epoch0 = flat(&run_epoch(&mut r, 2, 0, REQUEST_DATA_SIZE));

    // same byte layout, different values: only a re-read would see them
    let mut replaced = String::new();
    for i in 0..6 {
        replaced.push_str(&format!("{} {} c{}\n", i + 3, i * 10, i % 2));
    }
    fs::write(f.path(), replaced).unwrap();

    let epoch1 = flat(&run_epoch(&mut r, 2, 1, REQUEST_DATA_SIZE));
    assert_eq!(epoch0, (0..6).collect::<Vec<_>>());
    assert_eq!(epoch1, epoch0);
}

#[test]
fn test_data_end_markers() {
    let f = temp_data(6);
    let mut r = UciReader::<f32>::new(config(f.path())).unwrap();
    r.start_minibatch_loop(3, 0, REQUEST_DATA_SIZE).unwrap();
    assert!(!r.data_end(EndDataType::Null));
    assert!(r.data_end(EndDataType::Minibatch));
    assert!(!r.data_end(EndDataType::Epoch));
    assert!(!r.data_end(EndDataType::Set));

    let mut out = Minibatch::new();
    assert!(r.get_minibatch(&mut out).unwrap());
    assert!(r.get_minibatch(&mut out).unwrap());
    assert!(r.data_end(EndDataType::Epoch));
    assert!(r.data_end(EndDataType::Set));
    assert!(r.data_end(EndDataType::Sentence));
}

#[test]
fn test_zero_minibatch_size_is_config_error() {
    let f = temp_data(3);
    let mut r = UciReader::<f32>::new(config(f.path())).unwrap();
    assert!(matches!(
        r.start_minibatch_loop(0, 0, REQUEST_DATA_SIZE),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_empty_dataset_ends_immediately() {
    let f = temp_data(0);
    let mut r = UciReader::<f32>::new(config(f.path())).unwrap();
    assert!(run_epoch(&mut r, 4, 0, REQUEST_DATA_SIZE).is_empty());
    assert_eq!(r.total_samples(), Some(0));
    assert!(r.data_end(EndDataType::Set));
}

// Randomization

#[test]
fn test_randomized_epoch_is_a_permutation_within_windows() {
    let f = temp_data(10);
    let mut r =
        UciReader::<f32>::new(config(f.path()).randomize(Randomize::Window(3))).unwrap();
    let order = flat(&run_epoch(&mut r, 4, 0, REQUEST_DATA_SIZE));

    let mut sorted = order.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..10).collect::<Vec<_>>());
    for (pos, &record) in order.iter().enumerate() {
        assert_eq!(record / 3, pos / 3, "record {record} left its window");
    }
}

#[test]
fn test_randomization_is_deterministic_per_epoch() {
    let f = temp_data(20);
    let cfg = config(f.path()).randomize(Randomize::Auto);
    let mut a = UciReader::<f32>::new(cfg.clone()).unwrap();
    let mut b = UciReader::<f32>::new(cfg).unwrap();

    let a0 = run_epoch(&mut a, 5, 0, REQUEST_DATA_SIZE);
    let a1 = run_epoch(&mut a, 5, 1, REQUEST_DATA_SIZE);
    assert_ne!(flat(&a0), flat(&a1));

    // resuming straight at epoch 1 gives the same order
    assert_eq!(run_epoch(&mut b, 5, 1, REQUEST_DATA_SIZE), a1);
    assert_eq!(run_epoch(&mut b, 5, 0, REQUEST_DATA_SIZE), a0);
}

#[test]
fn test_random_seed_and_parallel_sequences() {
    let f = temp_data(4);
    let mut r = UciReader::<f32>::new(config(f.path())).unwrap();
    assert!(matches!(
        r.set_random_seed(42),
        Err(Error::UnsupportedOperation(_))
    ));
    assert_eq!(r.num_parallel_sequences(), 1);
    assert!(r.set_num_parallel_sequences(1).is_ok());
    assert!(matches!(
        r.set_num_parallel_sequences(4),
        Err(Error::UnsupportedOperation(_))
    ));
}

// Labels

#[test]
fn test_category_labels_are_one_hot() {
    let f = temp_data(4);
    let mut r = UciReader::<f32>::new(config(f.path())).unwrap();
    r.start_minibatch_loop(4, 0, REQUEST_DATA_SIZE).unwrap();
    let mut out = Minibatch::new();
    assert!(r.get_minibatch(&mut out).unwrap());

    let labels = &out["labels"];
    assert_eq!(labels.dims(), [2, 4]);
    for col in 0..4 {
        let mut expected = [0.0f32; 2];
        expected[col % 2] = 1.0;
        assert_eq!(labels.column(col), &expected);
    }
    let mapping = r.label_mapping("labels").unwrap();
    assert_eq!(mapping.get(&0).map(String::as_str), Some("c0"));
    assert_eq!(mapping.get(&1).map(String::as_str), Some("c1"));
    assert!(matches!(r.label_mapping("features"), Err(Error::Config(_))));
}

#[test]
fn test_label_overflow_on_extra_category() {
    let f = NamedTempFile::new().unwrap();
    fs::write(f.path(), "1 a\n2 b\n3 c\n").unwrap();
    let mut r = UciReader::<f32>::new(ReaderConfig::new(f.path(), 1).label_dim(2)).unwrap();
    r.start_minibatch_loop(1, 0, REQUEST_DATA_SIZE).unwrap();
    let mut out = Minibatch::new();
    match r.get_minibatch(&mut out) {
        Err(Error::LabelOverflow { label, label_dim }) => {
            assert_eq!(label, "c");
            assert_eq!(label_dim, 2);
        }
        other => panic!("expected LabelOverflow, got {other:?}"),
    }
}

#[test]
fn test_fixed_vocabulary() {
    let f = temp_data(4);
    let mut r = UciReader::<f32>::new(config(f.path())).unwrap();
    let vocab = BTreeMap::from([(0, "c1".to_string()), (1, "c0".to_string())]);
    r.set_label_mapping("labels", &vocab).unwrap();
    r.start_minibatch_loop(2, 0, REQUEST_DATA_SIZE).unwrap();
    let mut out = Minibatch::new();
    assert!(r.get_minibatch(&mut out).unwrap());
    // record 0 is "c0", ID 1 in the installed vocabulary
    assert_eq!(out["labels"].column(0), &[0.0, 1.0]);
    assert_eq!(r.label_mapping("labels").unwrap(), &vocab);
}

#[test]
fn test_unknown_label_in_fixed_vocabulary() {
    let f = temp_data(4);
    let mut r = UciReader::<f32>::new(config(f.path())).unwrap();
    r.set_label_mapping("labels", &BTreeMap::from([(0, "c0".to_string())]))
        .unwrap();
    r.start_minibatch_loop(4, 0, REQUEST_DATA_SIZE).unwrap();
    let mut out = Minibatch::new();
    assert!(matches!(
        r.get_minibatch(&mut out),
        Err(Error::UnknownLabel { .. })
    ));
}

#[test]
fn test_unknown_label_bucket() {
    let f = temp_data(4);
    let mut r = UciReader::<f32>::new(config(f.path()).unknown_label("<unk>")).unwrap();
    let vocab = BTreeMap::from([(0, "c0".to_string()), (1, "<unk>".to_string())]);
    r.set_label_mapping("labels", &vocab).unwrap();
    r.start_minibatch_loop(4, 0, REQUEST_DATA_SIZE).unwrap();
    let mut out = Minibatch::new();
    assert!(r.get_minibatch(&mut out).unwrap());
    assert_eq!(out["labels"].column(1), &[0.0, 1.0]);
}

#[test]
fn test_bad_label_mapping_rejected() {
    let f = temp_data(4);
    let mut r = UciReader::<f32>::new(config(f.path())).unwrap();
    let outside = BTreeMap::from([(5, "c0".to_string())]);
    assert!(matches!(
        r.set_label_mapping("labels", &outside),
        Err(Error::Config(_))
    ));
    let duplicate = BTreeMap::from([(0, "c0".to_string()), (1, "c0".to_string())]);
    assert!(r.set_label_mapping("labels", &duplicate).is_err());
}

#[test]
fn test_label_file_written_once_then_loaded() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data.txt");
    let vocab = dir.path().join("labels.txt");
    write_data(&data, 6);

    let mut r = UciReader::<f32>::new(config(&data).label_mapping_file(&vocab)).unwrap();
    r.start_minibatch_loop(2, 0, REQUEST_DATA_SIZE).unwrap();
    let mut out = Minibatch::new();
    assert!(r.get_minibatch(&mut out).unwrap());
    assert_eq!(fs::read_to_string(&vocab).unwrap(), "c0\nc1\n");

    // a later pass does not rewrite it
    fs::write(&vocab, "c0\nc1\n# untouched\n").unwrap();
    run_epoch(&mut r, 2, 1, REQUEST_DATA_SIZE);
    assert!(fs::read_to_string(&vocab).unwrap().ends_with("# untouched\n"));

    fs::write(&vocab, "c1\nc0\n").unwrap();
    let r = UciReader::<f32>::new(config(&data).label_mapping_file(&vocab)).unwrap();
    let mapping = r.label_mapping("labels").unwrap();
    assert_eq!(mapping.get(&0).map(String::as_str), Some("c1"));
}

#[test]
fn test_regression_labels_verbatim() {
    let f = NamedTempFile::new().unwrap();
    fs::write(f.path(), "1.0 2.0 0.5\n3.0 4.0 -1.25\n").unwrap();
    let mut r = UciReader::<f64>::new(
        ReaderConfig::new(f.path(), 2).label_type(LabelKind::Regression),
    )
    .unwrap();
    r.start_minibatch_loop(2, 0, REQUEST_DATA_SIZE).unwrap();
    let mut out = Minibatch::new();
    assert!(r.get_minibatch(&mut out).unwrap());
    assert_eq!(out["features"].as_slice(), &[1.0, 2.0, 3.0, 4.0]);
    assert_eq!(out["labels"].dims(), [1, 2]);
    assert_eq!(out["labels"].as_slice(), &[0.5, -1.25]);
    assert!(r.label_mapping("labels").is_err());
}

#[test]
fn test_no_labels_emits_features_only() {
    let f = temp_data(3);
    let cfg = ReaderConfig::new(f.path(), 2).label_type(LabelKind::None);
    let mut r = UciReader::<f32>::new(cfg).unwrap();
    r.start_minibatch_loop(3, 0, REQUEST_DATA_SIZE).unwrap();
    let mut out = Minibatch::new();
    assert!(r.get_minibatch(&mut out).unwrap());
    assert_eq!(out.len(), 1);
    assert_eq!(out["features"].dims(), [2, 3]);
}

#[test]
fn test_parse_error_surfaces() {
    let f = NamedTempFile::new().unwrap();
    fs::write(f.path(), "1 2 a\n3 oops b\n").unwrap();
    let mut r = UciReader::<f32>::new(config(f.path())).unwrap();
    r.start_minibatch_loop(2, 0, REQUEST_DATA_SIZE).unwrap();
    let mut out = Minibatch::new();
    assert!(matches!(
        r.get_minibatch(&mut out),
        Err(Error::Parse { line: 2, .. })
    ));
}

// Cache

#[test]
fn test_cache_replays_identical_minibatches() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data.txt");
    let cache = dir.path().join("data.ucic");
    write_data(&data, 11);
    let cfg = config(&data).randomize(Randomize::Auto).cache(&cache);

    let mut live = UciReader::<f32>::new(cfg.clone()).unwrap();
    live.start_minibatch_loop(4, 0, REQUEST_DATA_SIZE).unwrap();
    let mut expected = Vec::new();
    let mut out = Minibatch::new();
    while live.get_minibatch(&mut out).unwrap() {
        expected.push(out.clone());
    }
    assert!(!live.is_serving_from_cache());
    assert!(cache.exists());

    let mut cached = UciReader::<f32>::new(cfg).unwrap();
    cached.start_minibatch_loop(4, 0, REQUEST_DATA_SIZE).unwrap();
    assert!(cached.is_serving_from_cache());
    let mut replayed = Vec::new();
    while cached.get_minibatch(&mut out).unwrap() {
        replayed.push(out.clone());
    }
    assert_eq!(replayed, expected);
    assert!(cached.data_end(EndDataType::Epoch));
    assert_eq!(
        cached.label_mapping("labels").unwrap(),
        live.label_mapping("labels").unwrap()
    );
}

#[test]
fn test_cache_not_served_for_other_loop() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data.txt");
    let cache = dir.path().join("data.ucic");
    write_data(&data, 6);
    let cfg = config(&data).randomize(Randomize::Auto).cache(&cache);

    let mut live = UciReader::<f32>::new(cfg.clone()).unwrap();
    let epoch0 = run_epoch(&mut live, 2, 0, REQUEST_DATA_SIZE);
    assert!(cache.exists());

    let mut r = UciReader::<f32>::new(cfg).unwrap();
    let other_size = run_epoch(&mut r, 3, 0, REQUEST_DATA_SIZE);
    assert!(!r.is_serving_from_cache());
    assert_eq!(flat(&other_size), flat(&epoch0));

    // the next epoch is shuffled differently, so the cache cannot stand in
    run_epoch(&mut r, 2, 1, REQUEST_DATA_SIZE);
    assert!(!r.is_serving_from_cache());
}

#[test]
fn test_cache_not_served_for_other_shuffle_window() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data.txt");
    let cache = dir.path().join("data.ucic");
    write_data(&data, 12);

    let mut builder =
        UciReader::<f32>::new(config(&data).randomize(Randomize::Window(3)).cache(&cache))
            .unwrap();
    let windowed = flat(&run_epoch(&mut builder, 4, 0, REQUEST_DATA_SIZE));
    assert!(cache.exists());

    let mut plain = UciReader::<f32>::new(config(&data).randomize(Randomize::Auto)).unwrap();
    let whole = flat(&run_epoch(&mut plain, 4, 0, REQUEST_DATA_SIZE));

    let mut r =
        UciReader::<f32>::new(config(&data).randomize(Randomize::Auto).cache(&cache)).unwrap();
    assert_eq!(flat(&run_epoch(&mut r, 4, 0, REQUEST_DATA_SIZE)), whole);
    assert!(!r.is_serving_from_cache());

    let mut same =
        UciReader::<f32>::new(config(&data).randomize(Randomize::Window(3)).cache(&cache))
            .unwrap();
    assert_eq!(flat(&run_epoch(&mut same, 4, 0, REQUEST_DATA_SIZE)), windowed);
    assert!(same.is_serving_from_cache());
}

#[test]
fn test_abandoned_epoch_leaves_no_cache() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data.txt");
    let cache = dir.path().join("data.ucic");
    write_data(&data, 6);

    let mut r = UciReader::<f32>::new(config(&data).cache(&cache)).unwrap();
    r.start_minibatch_loop(2, 0, REQUEST_DATA_SIZE).unwrap();
    let mut out = Minibatch::new();
    assert!(r.get_minibatch(&mut out).unwrap());
    r.destroy();
    assert!(!cache.exists());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

// Sources and lifecycle

#[test]
fn test_one_line_per_file() {
    let dir = TempDir::new().unwrap();
    let mut list = String::new();
    for i in 0..3 {
        let name = format!("rec{i}.txt");
        fs::write(dir.path().join(&name), format!("{i}, {}, c{}\n", i * 10, i % 2)).unwrap();
        list.push_str(&name);
        list.push('\n');
    }
    let list_path = dir.path().join("list.txt");
    fs::write(&list_path, list).unwrap();

    let mut r = UciReader::<f32>::new(config(&list_path).one_line_per_file(true)).unwrap();
    assert_eq!(flat(&run_epoch(&mut r, 2, 0, REQUEST_DATA_SIZE)), vec![0, 1, 2]);
    assert_eq!(r.total_samples(), Some(3));
}

#[test]
fn test_missing_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.txt");
    assert!(matches!(
        UciReader::<f32>::new(config(&missing)),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_destroy_is_idempotent() {
    let f = temp_data(4);
    let mut r = UciReader::<f32>::new(config(f.path())).unwrap();
    run_epoch(&mut r, 2, 0, REQUEST_DATA_SIZE);
    r.destroy();
    r.destroy();
    assert_eq!(r.state(), ReaderState::Closed);
    let mut out = Minibatch::new();
    assert!(matches!(
        r.get_minibatch(&mut out),
        Err(Error::InvalidState(_))
    ));
}

#[test]
fn test_reader_from_json_config() {
    let f = temp_data(5);
    let json = format!(
        r#"{{"file": {:?}, "featureDim": 2, "labelDim": 2, "partialMinibatch": false}}"#,
        f.path().to_str().unwrap()
    );
    let mut r = UciReader::<f32>::new(ReaderConfig::from_json_str(&json).unwrap()).unwrap();
    assert_eq!(flat(&run_epoch(&mut r, 2, 0, REQUEST_DATA_SIZE)), vec![0, 1, 2, 3]);
}
