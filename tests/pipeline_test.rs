#![cfg(unix)]

use fforest::checkpoint_manager::CheckpointManager;
use fforest::config::Configuration;
use fforest::layout::Layout;
use fforest::phase::Phase;
use fforest::pipeline::{self, RunOptions, Statistics};
use fforest::reducer::{BooleanVector, DifficultyVector};
use fforest::splitter::SplitValue;
use fforest::table;
use fforest::ForestError;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

/// Classifies every reference instance as X under t-norm 0 and as Y under
/// t-norm 1. The reference database is the 11th argument.
const FAKE_WORKER: &str = r#"#!/bin/sh
awk -F, '{ print "x 0", $1, $NF, "X 0.7 Y 0.3"; print "x 1", $1, $NF, "X 0.4 Y 0.6" }' "${11}"
"#;

fn write_worker(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake_worker.sh");
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn setup(worker_body: &str) -> (TempDir, Configuration) {
    let temp_dir = tempdir().unwrap();
    let database = temp_dir.path().join("forest.csv");
    let mut body = String::from("f1,f2,class\n");
    for i in 0..20 {
        body.push_str(&format!("{},{},{}\n", i, (i * 3) % 7, if i % 2 == 0 { "X" } else { "Y" }));
    }
    fs::write(&database, body).unwrap();

    let config = Configuration {
        database,
        worker: write_worker(temp_dir.path(), worker_body),
        trees_in_forest: 3,
        tnorms: 1,
        training_value: SplitValue::Proportion(0.5),
        reference_value: SplitValue::Proportion(0.4),
        quality_threshold: 0.5,
        ..Configuration::default()
    };
    (temp_dir, config)
}

fn last_checkpoint(layout: &Layout) -> Option<Phase> {
    CheckpointManager::new(&layout.checkpoint())
        .load()
        .unwrap()
        .map(|c| c.last_completed)
}

#[test]
fn test_full_run() {
    let (_temp_dir, config) = setup(FAKE_WORKER);
    let layout = Layout::new(&config);
    let dialect = &config.output_dialect;

    let statistics = pipeline::run(&config, &RunOptions::default()).unwrap();

    assert_eq!(statistics.preprocessed_rows, Some(20));
    assert_eq!(statistics.train_rows, Some(10));
    assert_eq!(statistics.test_rows, Some(10));
    assert_eq!(statistics.reference_rows, Some(4));
    assert_eq!(statistics.subtrain_rows, Some(6));
    assert_eq!(statistics.shard_rows, vec![2, 2, 2]);
    assert_eq!(statistics.classes, vec!["X", "Y"]);
    assert_eq!(statistics.tnorms, vec!["zadeh", "lukasiewicz"]);
    assert_eq!(statistics.forest_accuracy["zadeh"], 0.5);
    assert_eq!(statistics.hard_instances["zadeh"], 2);
    assert_eq!(statistics.hard_instances["lukasiewicz"], 2);
    assert_eq!(statistics.core_trees["zadeh"], 3);
    assert_eq!(last_checkpoint(&layout), Some(Phase::Ending));

    let saved: Statistics = serde_json::from_slice(&fs::read(layout.statistics()).unwrap()).unwrap();
    assert_eq!(saved, statistics);

    for index in 1..=3 {
        assert!(layout.tree_output(index).exists());
        let booleans = BooleanVector::read("zadeh", &layout.bool_vector(index, "zadeh"), dialect).unwrap();
        assert_eq!(booleans.entries.len(), 4);
        assert!(layout.quality_vector(index, "lukasiewicz").exists());
    }

    let reference_classes = table::get_column(&layout.reference(), &table::ColumnRef::Last, false, dialect).unwrap();
    let difficulty = DifficultyVector::read(&layout.difficulty_vector("zadeh"), dialect).unwrap();
    for ((_, value), class) in difficulty.entries.iter().zip(&reference_classes) {
        let expected = if class == "X" { 0.7 } else { 0.3 };
        assert_eq!(*value, expected);
    }

    for class in ["X", "Y"] {
        for tnorm in ["zadeh", "lukasiewicz"] {
            let (header, rows) = table::read_table(&layout.class_matrix(class, tnorm), true, dialect).unwrap();
            assert_eq!(header.unwrap().len(), 5);
            assert_eq!(rows.len(), 3);
            assert_eq!(rows[0][0], layout.shard_name(1));
        }
    }

    let report = table::read_table(&layout.forest_quality("zadeh"), false, dialect).unwrap().1;
    assert_eq!(report.len(), 5);
    assert_eq!(report[3], vec!["forest", "0.5"]);
    assert_eq!(report[4], vec!["hard_instances", "2"]);

    assert!(layout.cluster("lukasiewicz").exists());
}

#[test]
fn test_stop_and_resume() {
    let (_temp_dir, config) = setup(FAKE_WORKER);
    let layout = Layout::new(&config);

    let options = RunOptions {
        stop: Phase::InitialSplit,
        ..RunOptions::default()
    };
    let statistics = pipeline::run(&config, &options).unwrap();
    assert_eq!(statistics.train_rows, Some(10));
    assert_eq!(last_checkpoint(&layout), Some(Phase::InitialSplit));
    assert!(!layout.reference().exists());

    let skipping = RunOptions {
        start: Some(Phase::Learning),
        ..RunOptions::default()
    };
    assert!(matches!(
        pipeline::run(&config, &skipping),
        Err(ForestError::PhaseNotProcessable { .. })
    ));

    let resume = RunOptions {
        resume: true,
        stop: Phase::SubsubtrainSplit,
        ..RunOptions::default()
    };
    let statistics = pipeline::run(&config, &resume).unwrap();
    assert_eq!(statistics.train_rows, Some(10));
    assert_eq!(statistics.shard_rows, vec![2, 2, 2]);
    assert_eq!(last_checkpoint(&layout), Some(Phase::SubsubtrainSplit));
    assert!(layout.shard_database(3).exists());
}

#[test]
fn test_fresh_run_discards_previous_progress() {
    let (_temp_dir, config) = setup(FAKE_WORKER);
    let layout = Layout::new(&config);
    pipeline::run(&config, &RunOptions::default()).unwrap();
    assert_eq!(last_checkpoint(&layout), Some(Phase::Ending));

    let options = RunOptions {
        stop: Phase::InitialSplit,
        ..RunOptions::default()
    };
    let statistics = pipeline::run(&config, &options).unwrap();
    assert_eq!(last_checkpoint(&layout), Some(Phase::InitialSplit));
    assert!(!statistics.completed_phases.contains(&Phase::Learning));
    assert!(statistics.forest_accuracy.is_empty());
}

#[test]
fn test_worker_failure_keeps_checkpoint() {
    let (_temp_dir, config) = setup("#!/bin/sh\necho 'no reference' >&2\nexit 2\n");
    let layout = Layout::new(&config);

    let result = pipeline::run(&config, &RunOptions::default());
    assert!(matches!(result, Err(ForestError::WorkerFailure { status: Some(2), .. })));
    assert_eq!(last_checkpoint(&layout), Some(Phase::SubsubtrainSplit));
}

#[test]
fn test_malformed_worker_output() {
    let (_temp_dir, config) = setup("#!/bin/sh\necho 'x 0 1 X X 1.0'\n");

    let result = pipeline::run(&config, &RunOptions::default());
    assert!(matches!(result, Err(ForestError::ResultParse { .. })));
}
