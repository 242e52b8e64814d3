use crate::dialect::Dialect;
use crate::splitter::{SplitMethod, SplitValue};
use crate::table::ColumnRef;
use crate::ForestError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Entropy used by the tree builder when choosing splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntropyMeasure {
    #[default]
    Shannon,
    Star,
}

/// File and directory names used under the main directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Names {
    pub preprocessed: String,
    pub header: String,
    pub train: String,
    pub test: String,
    pub subtrain_dir: String,
    pub reference: String,
    pub subtrain: String,
    /// `{}` is replaced by the zero-padded 1-based shard index.
    pub shard_pattern: String,
    pub tree_output: String,
    pub bool_prefix: String,
    pub membership_prefix: String,
    pub quality_prefix: String,
    pub difficulty_prefix: String,
    pub forest_quality_prefix: String,
    pub matrix_prefix: String,
    pub classes_matrices_dir: String,
    pub clusters_dir: String,
    pub checkpoint: String,
    pub statistics: String,
}

impl Default for Names {
    fn default() -> Self {
        Self {
            preprocessed: "preprocessed.csv".to_string(),
            header: "header.csv".to_string(),
            train: "train.csv".to_string(),
            test: "test.csv".to_string(),
            subtrain_dir: "subtrain".to_string(),
            reference: "reference.csv".to_string(),
            subtrain: "subtrain.csv".to_string(),
            shard_pattern: "{}_sstrain".to_string(),
            tree_output: "tree.out".to_string(),
            bool_prefix: "bool_".to_string(),
            membership_prefix: "membership_".to_string(),
            quality_prefix: "quality_".to_string(),
            difficulty_prefix: "difficulty_".to_string(),
            forest_quality_prefix: "forest_quality_".to_string(),
            matrix_prefix: "matrix_".to_string(),
            classes_matrices_dir: "classes_matrices".to_string(),
            clusters_dir: "clusters".to_string(),
            checkpoint: "checkpoint.json".to_string(),
            statistics: "statistics.json".to_string(),
        }
    }
}

const SPLIT_METHOD_KEYS: [&str; 3] = ["initial_split_method", "reference_split_method", "subsubtrain_split_method"];

/// Resolved run configuration. Loaded once, validated once, then only borrowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub database: PathBuf,
    /// Directory holding the main directory. Defaults to the database's parent.
    pub parent_dir: Option<PathBuf>,
    /// Defaults to the database file stem.
    pub main_directory: Option<String>,
    /// `None` synthesizes an `ID` column during preprocessing.
    pub identifier: Option<ColumnRef>,
    pub class_column: ColumnRef,
    pub has_header: bool,
    pub input_dialect: Dialect,
    pub output_dialect: Dialect,

    pub initial_split_method: SplitMethod,
    pub reference_split_method: SplitMethod,
    pub subsubtrain_split_method: SplitMethod,
    pub training_value: SplitValue,
    pub reference_value: SplitValue,
    pub trees_in_forest: usize,

    pub tnorms: usize,
    pub discretization_threshold: u32,
    pub entropy_measure: EntropyMeasure,
    /// Reserved: the tree builder takes no flag for it yet, so it is
    /// validated and recorded but never passed on.
    pub entropy_threshold: f64,
    /// Reserved, like `entropy_threshold`.
    pub min_size_leaf: usize,

    pub worker: PathBuf,
    /// Defaults to one worker per shard.
    pub max_workers: Option<usize>,
    pub worker_timeout_secs: u64,

    pub quality_threshold: f64,
    pub names: Names,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            database: PathBuf::new(),
            parent_dir: None,
            main_directory: None,
            identifier: None,
            class_column: ColumnRef::Last,
            has_header: true,
            input_dialect: Dialect::default(),
            output_dialect: Dialect::default(),
            initial_split_method: SplitMethod::Stratified,
            reference_split_method: SplitMethod::Stratified,
            subsubtrain_split_method: SplitMethod::Stratified,
            training_value: SplitValue::Proportion(0.8),
            reference_value: SplitValue::Proportion(0.1),
            trees_in_forest: 100,
            tnorms: 3,
            discretization_threshold: 30,
            entropy_measure: EntropyMeasure::Shannon,
            entropy_threshold: 0.01,
            min_size_leaf: 1,
            worker: PathBuf::from("Salammbo"),
            max_workers: None,
            worker_timeout_secs: 3600,
            quality_threshold: 0.5,
            names: Names::default(),
        }
    }
}

impl Configuration {
    pub fn load(path: &Path) -> Result<Self, ForestError> {
        let text = fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&text)?;
        // Method names are checked up front so a typo reports the method,
        // not a generic deserialization failure.
        for key in SPLIT_METHOD_KEYS {
            if let Some(name) = value.get(key).and_then(serde_json::Value::as_str) {
                name.parse::<SplitMethod>()?;
            }
        }
        let config: Configuration = serde_json::from_value(value)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ForestError> {
        if self.database.as_os_str().is_empty() {
            return Err(ForestError::Configuration("no database given".to_string()));
        }
        self.training_value.validate()?;
        self.reference_value.validate()?;
        self.input_dialect.validate()?;
        self.output_dialect.validate()?;

        if self.trees_in_forest == 0 {
            return Err(ForestError::Configuration("trees_in_forest must be at least 1".to_string()));
        }
        if self.max_workers == Some(0) {
            return Err(ForestError::Configuration("max_workers must be at least 1".to_string()));
        }
        if self.worker_timeout_secs == 0 {
            return Err(ForestError::Configuration("worker_timeout_secs must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.entropy_threshold) {
            return Err(ForestError::Configuration(format!(
                "entropy_threshold {} is outside [0, 1]",
                self.entropy_threshold
            )));
        }
        if !self.quality_threshold.is_finite() || self.quality_threshold < 0.0 {
            return Err(ForestError::Configuration(format!(
                "quality_threshold {} must be a non-negative number",
                self.quality_threshold
            )));
        }
        if !self.has_header {
            for column in std::iter::once(&self.class_column).chain(self.identifier.as_ref()) {
                if let ColumnRef::Name(name) = column {
                    return Err(ForestError::Configuration(format!(
                        "column \"{}\" is referenced by name but the database has no header",
                        name
                    )));
                }
            }
        }
        if self.identifier.is_some() && self.identifier.as_ref() == Some(&self.class_column) {
            return Err(ForestError::Configuration(
                "identifier and class columns must differ".to_string(),
            ));
        }
        if self.names.shard_pattern.matches("{}").count() != 1 {
            return Err(ForestError::Configuration(format!(
                "shard pattern \"{}\" must contain exactly one {{}}",
                self.names.shard_pattern
            )));
        }
        Ok(())
    }

    /// Concurrency cap for the learning phase.
    pub fn worker_limit(&self) -> usize {
        self.max_workers.unwrap_or(self.trees_in_forest).max(1)
    }

    /// Lines per instance in worker output.
    pub fn tnorm_count(&self) -> usize {
        self.tnorms + 1
    }
}
