use crate::checkpoint_manager::{Checkpoint, CheckpointManager};
use crate::cluster::{cluster_trees, tree_point, write_clusters};
use crate::config::Configuration;
use crate::dialect::Dialect;
use crate::layout::Layout;
use crate::phase::{Phase, PhaseHandler, PhaseMachine};
use crate::preprocessing::{possible_classes, preprocess};
use crate::reducer::{self, class_matrix, correctness, difficulty, quality, BooleanVector, DifficultyVector, MembershipVector};
use crate::result_parser::{parse_identifier, parse_output};
use crate::splitter::Splitter;
use crate::table::{self, ColumnRef};
use crate::tnorm::tnorm_names;
use crate::worker::{collect_outputs, run_forest, WorkerOptions};
use crate::ForestError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const FOREST_ROW: &str = "forest";
pub const HARD_INSTANCES_ROW: &str = "hard_instances";

/// Counters gathered over a run, dumped as JSON by the ending phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Statistics {
    pub database: PathBuf,
    pub preprocessed_rows: Option<usize>,
    pub train_rows: Option<usize>,
    pub test_rows: Option<usize>,
    pub reference_rows: Option<usize>,
    pub subtrain_rows: Option<usize>,
    pub shard_rows: Vec<usize>,
    pub classes: Vec<String>,
    pub tnorms: Vec<String>,
    pub trees: usize,
    pub forest_accuracy: BTreeMap<String, f64>,
    pub hard_instances: BTreeMap<String, usize>,
    pub core_trees: BTreeMap<String, usize>,
    pub completed_phases: Vec<Phase>,
}

impl Statistics {
    fn load_or_default(path: &Path) -> Result<Self, ForestError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// `None` starts from the beginning, or after the checkpoint when resuming.
    pub start: Option<Phase>,
    pub stop: Phase,
    pub resume: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            start: None,
            stop: Phase::Ending,
            resume: false,
        }
    }
}

/// Runs the phases selected by `options` and returns the run statistics.
pub fn run(config: &Configuration, options: &RunOptions) -> Result<Statistics, ForestError> {
    config.validate()?;
    let mut pipeline = Pipeline::new(config)?;
    let mut checkpoint = pipeline.checkpoints.load()?;

    let start = match (options.start, options.resume) {
        (Some(phase), _) => phase,
        (None, true) => {
            info!("[pipeline] resuming from {}", pipeline.checkpoints.path().display());
            checkpoint.as_ref().map_or(Phase::Parsing, Checkpoint::resume_phase)
        }
        (None, false) => {
            // A fresh run owns the main directory from scratch.
            pipeline.checkpoints.clear()?;
            pipeline.reset_statistics();
            checkpoint = None;
            Phase::Parsing
        }
    };
    let last_completed = checkpoint.as_ref().map(|c| c.last_completed);
    info!("[pipeline] starting at {}, stopping after {}", start, options.stop);

    let mut machine = PhaseMachine::new(start, last_completed)?;
    machine.run_until(options.stop, &mut pipeline)?;
    Ok(pipeline.statistics)
}

/// Phase handlers for one run.
pub struct Pipeline<'a> {
    config: &'a Configuration,
    layout: Layout,
    checkpoints: CheckpointManager,
    statistics: Statistics,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Configuration) -> Result<Self, ForestError> {
        let layout = Layout::new(config);
        let checkpoints = CheckpointManager::new(&layout.checkpoint());
        let statistics = Statistics::load_or_default(&layout.statistics())?;
        let mut pipeline = Self {
            config,
            layout,
            checkpoints,
            statistics,
        };
        pipeline.stamp_statistics();
        Ok(pipeline)
    }

    fn stamp_statistics(&mut self) {
        self.statistics.database = self.config.database.clone();
        self.statistics.trees = self.config.trees_in_forest;
        self.statistics.tnorms = tnorm_names(self.config.tnorms);
    }

    fn reset_statistics(&mut self) {
        self.statistics = Statistics::default();
        self.stamp_statistics();
    }

    fn dialect(&self) -> &Dialect {
        &self.config.output_dialect
    }

    fn classes(&mut self) -> Result<Vec<String>, ForestError> {
        if self.statistics.classes.is_empty() {
            self.statistics.classes = possible_classes(&self.layout.preprocessed(), self.dialect())?;
        }
        Ok(self.statistics.classes.clone())
    }

    fn reference_identifiers(&self) -> Result<Vec<String>, ForestError> {
        table::get_column(&self.layout.reference(), &ColumnRef::Index(0), false, self.dialect())
    }

    fn parsing(&mut self) -> Result<(), ForestError> {
        self.config.validate()?;
        fs::create_dir_all(self.layout.main_dir())?;
        debug!("[pipeline] configuration: {:?}", self.config);
        Ok(())
    }

    fn preprocessing(&mut self) -> Result<(), ForestError> {
        let report = preprocess(self.config, &self.layout)?;
        self.statistics.preprocessed_rows = Some(report.rows);
        self.statistics.classes = report.classes;
        Ok(())
    }

    fn initial_split(&mut self) -> Result<(), ForestError> {
        let source = self.layout.preprocessed();
        let total = table::count_rows(&source, false, self.dialect())?;
        let limit = self.config.training_value.row_limit(total)?;
        let (train, test) = Splitter::new(self.dialect(), false).split2(
            &source,
            limit,
            self.config.initial_split_method,
            &ColumnRef::Last,
            &self.layout.train(),
            &self.layout.test(),
        )?;
        info!("[pipeline] {} rows: {} train, {} test", total, train, test);
        self.statistics.train_rows = Some(train);
        self.statistics.test_rows = Some(test);
        Ok(())
    }

    fn reference_split(&mut self) -> Result<(), ForestError> {
        fs::create_dir_all(self.layout.subtrain_dir())?;
        let source = self.layout.train();
        let total = table::count_rows(&source, false, self.dialect())?;
        let limit = self.config.reference_value.row_limit(total)?;
        let (reference, subtrain) = Splitter::new(self.dialect(), false).split2(
            &source,
            limit,
            self.config.reference_split_method,
            &ColumnRef::Last,
            &self.layout.reference(),
            &self.layout.subtrain(),
        )?;
        info!("[pipeline] {} train rows: {} reference, {} subtrain", total, reference, subtrain);
        self.statistics.reference_rows = Some(reference);
        self.statistics.subtrain_rows = Some(subtrain);
        Ok(())
    }

    fn subsubtrain_split(&mut self) -> Result<(), ForestError> {
        for index in 1..=self.layout.tree_count() {
            fs::create_dir_all(self.layout.shard_dir(index))?;
        }
        let counts = Splitter::new(self.dialect(), false).split_many(
            &self.layout.subtrain(),
            self.config.subsubtrain_split_method,
            &ColumnRef::Last,
            &self.layout.shard_databases(),
        )?;
        info!("[pipeline] subtrain split into {} shards", counts.len());
        self.statistics.shard_rows = counts;
        Ok(())
    }

    fn learning(&mut self) -> Result<(), ForestError> {
        let classes = self.classes()?;
        let tnorm_count = self.config.tnorm_count();
        let names = tnorm_names(self.config.tnorms);

        let results = run_forest(
            &self.layout.shard_databases(),
            &self.layout.reference(),
            &WorkerOptions::from_config(self.config),
        );
        let outputs = collect_outputs(results)?;

        for (offset, output) in outputs.iter().enumerate() {
            let index = offset + 1;
            let shard = self.layout.shard_name(index);
            fs::write(self.layout.tree_output(index), &output.stdout)?;

            let records = parse_output(&shard, &output.stdout, tnorm_count)?;
            for vector in correctness(&records, tnorm_count) {
                vector.write(&self.layout.bool_vector(index, &vector.tnorm), self.dialect())?;
            }
            for (tnorm, name) in names.iter().enumerate() {
                MembershipVector::from_records(&records, tnorm, &classes)
                    .write(&self.layout.membership_vector(index, name), self.dialect())?;
            }
            debug!("[pipeline] {}: {} instances classified", shard, records.len());
        }
        Ok(())
    }

    fn reduction(&mut self) -> Result<(), ForestError> {
        let trees = self.layout.tree_count();
        for name in tnorm_names(self.config.tnorms) {
            let mut qualities = Vec::with_capacity(trees);
            for index in 1..=trees {
                let vector = MembershipVector::read(&name, &self.layout.membership_vector(index, &name), self.dialect())?;
                let q = quality(&vector, trees);
                q.write(&self.layout.quality_vector(index, &name), self.dialect())?;
                qualities.push(q);
            }
            difficulty(&qualities).write(&self.layout.difficulty_vector(&name), self.dialect())?;
        }
        Ok(())
    }

    fn quality(&mut self) -> Result<(), ForestError> {
        let trees = self.layout.tree_count();
        for name in tnorm_names(self.config.tnorms) {
            let mut rows = Vec::with_capacity(trees + 2);
            let mut total = 0.0;
            for index in 1..=trees {
                let accuracy = BooleanVector::read(&name, &self.layout.bool_vector(index, &name), self.dialect())?.accuracy();
                total += accuracy;
                rows.push([self.layout.shard_name(index), accuracy.to_string()]);
            }
            let mean = reducer::round_float(total / trees as f64);

            let difficulty = DifficultyVector::read(&self.layout.difficulty_vector(&name), self.dialect())?;
            let hard = difficulty
                .entries
                .iter()
                .filter(|(_, d)| *d < self.config.quality_threshold)
                .count();
            rows.push([FOREST_ROW.to_string(), mean.to_string()]);
            rows.push([HARD_INSTANCES_ROW.to_string(), hard.to_string()]);

            table::write_rows(&self.layout.forest_quality(&name), self.dialect(), rows)?;
            info!("[pipeline] {}: forest accuracy {}, {} hard instances", name, mean, hard);
            self.statistics.forest_accuracy.insert(name.clone(), mean);
            self.statistics.hard_instances.insert(name, hard);
        }
        Ok(())
    }

    fn classes_matrices(&mut self) -> Result<(), ForestError> {
        let classes = self.classes()?;
        let identifiers = self.reference_identifiers()?;
        let shards = self.layout.shard_names();

        for class in &classes {
            fs::create_dir_all(self.layout.class_matrix_dir(class))?;
            for name in tnorm_names(self.config.tnorms) {
                let trees: Vec<(String, PathBuf)> = shards
                    .iter()
                    .enumerate()
                    .map(|(offset, shard)| (shard.clone(), self.layout.membership_vector(offset + 1, &name)))
                    .collect();
                class_matrix(class, &name, &trees, &identifiers, self.dialect())?
                    .write(&self.layout.class_matrix(class, &name), self.dialect())?;
            }
        }
        Ok(())
    }

    fn clustering_trees(&mut self) -> Result<(), ForestError> {
        let identifiers = self
            .reference_identifiers()?
            .iter()
            .map(|id| parse_identifier(id).map_err(ForestError::Reduction))
            .collect::<Result<Vec<_>, _>>()?;
        fs::create_dir_all(self.layout.clusters_dir())?;

        for name in tnorm_names(self.config.tnorms) {
            let mut points = Vec::with_capacity(self.layout.tree_count());
            for (offset, shard) in self.layout.shard_names().into_iter().enumerate() {
                let vector = MembershipVector::read(&name, &self.layout.membership_vector(offset + 1, &name), self.dialect())?;
                points.push((shard, tree_point(&vector, &identifiers)?));
            }
            let clusters = cluster_trees(&points);
            write_clusters(&self.layout.cluster(&name), self.dialect(), &clusters)?;
            self.statistics
                .core_trees
                .insert(name, clusters.iter().filter(|c| c.core).count());
        }
        Ok(())
    }

    fn ending(&mut self) -> Result<(), ForestError> {
        self.save_statistics()?;
        info!("[pipeline] statistics written to {}", self.layout.statistics().display());
        Ok(())
    }

    fn save_statistics(&self) -> Result<(), ForestError> {
        fs::create_dir_all(self.layout.main_dir())?;
        fs::write(self.layout.statistics(), serde_json::to_vec_pretty(&self.statistics)?)?;
        Ok(())
    }
}

impl PhaseHandler for Pipeline<'_> {
    fn run(&mut self, phase: Phase) -> Result<(), ForestError> {
        match phase {
            Phase::Parsing => self.parsing(),
            Phase::Preprocessing => self.preprocessing(),
            Phase::InitialSplit => self.initial_split(),
            Phase::ReferenceSplit => self.reference_split(),
            Phase::SubsubtrainSplit => self.subsubtrain_split(),
            Phase::Learning => self.learning(),
            Phase::Reduction => self.reduction(),
            Phase::Quality => self.quality(),
            Phase::ClassesMatrices => self.classes_matrices(),
            Phase::ClusteringTrees => self.clustering_trees(),
            Phase::Ending => self.ending(),
        }
    }

    fn completed(&mut self, phase: Phase) -> Result<(), ForestError> {
        if !self.statistics.completed_phases.contains(&phase) {
            self.statistics.completed_phases.push(phase);
        }
        self.save_statistics()?;
        self.checkpoints.save(&Checkpoint::new(phase))
    }
}
