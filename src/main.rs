use clap::Parser;
use fforest::config::Configuration;
use fforest::phase::Phase;
use fforest::pipeline::{self, RunOptions};
use fforest::ForestError;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fforest")]
#[command(about = "Builds and evaluates a forest of fuzzy decision trees over a delimited dataset", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database to process, overriding the configuration
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Phase to start from
    #[arg(long)]
    phase: Option<Phase>,

    /// Last phase to run
    #[arg(long, default_value = "ending")]
    stop: Phase,

    /// Start after the last checkpointed phase
    #[arg(long, conflicts_with = "phase")]
    resume: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn run(cli: Cli) -> Result<(), ForestError> {
    let mut config = match &cli.config {
        Some(path) => Configuration::load(path)?,
        None => Configuration::default(),
    };
    if let Some(database) = cli.database {
        config.database = database;
    }

    let options = RunOptions {
        start: cli.phase,
        stop: cli.stop,
        resume: cli.resume,
    };
    let statistics = pipeline::run(&config, &options)?;
    info!(
        "[fforest] done: {} trees, {} classes, phases {:?}",
        statistics.trees,
        statistics.classes.len(),
        statistics.completed_phases
    );
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli) {
        eprintln!("[fforest] {}", e);
        std::process::exit(1);
    }
}
