use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ForestError {
    Configuration(String),
    InvalidProportion(f64),
    InvalidRowLimit { limit: usize, total: usize },
    UnknownSplittingMethod(String),
    UnknownPhase(String),
    PhaseNotProcessable { phase: String, last_completed: String },
    PhaseOverrun,
    MissingHeader(PathBuf),
    MissingColumn { path: PathBuf, column: String },
    WorkerFailure { shard: PathBuf, status: Option<i32>, stderr: String },
    WorkerTimeout { shard: PathBuf, seconds: u64 },
    WorkerCancelled(PathBuf),
    ResultParse { shard: String, line_number: usize, line: String, reason: String },
    Reduction(String),
    Encoding { path: PathBuf, reason: String },
    Io(std::io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
}

impl fmt::Display for ForestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForestError::Configuration(e) => write!(f, "Configuration error: {}", e),
            ForestError::InvalidProportion(p) => {
                write!(f, "Configuration error: proportion {} is outside [0, 1]", p)
            }
            ForestError::InvalidRowLimit { limit, total } => write!(
                f,
                "Partition error: row limit {} exceeds the {} rows available",
                limit, total
            ),
            ForestError::UnknownSplittingMethod(m) => {
                write!(f, "Configuration error: unknown splitting method \"{}\"", m)
            }
            ForestError::UnknownPhase(p) => write!(f, "Configuration error: the phase \"{}\" doesn't exist", p),
            ForestError::PhaseNotProcessable { phase, last_completed } => write!(
                f,
                "Phase error: \"{}\" cannot run, last completed phase is \"{}\"",
                phase, last_completed
            ),
            ForestError::PhaseOverrun => write!(f, "Phase error: no phase after the ending phase"),
            ForestError::MissingHeader(path) => write!(
                f,
                "Configuration error: {} has no header, columns must be referenced by index",
                path.display()
            ),
            ForestError::MissingColumn { path, column } => {
                write!(f, "Missing column \"{}\" in {}", column, path.display())
            }
            ForestError::WorkerFailure { shard, status, stderr } => {
                let status = status.map_or_else(|| "signal".to_string(), |code| code.to_string());
                write!(
                    f,
                    "Worker error: tree construction for {} exited with {}: {}",
                    shard.display(),
                    status,
                    stderr.trim()
                )
            }
            ForestError::WorkerTimeout { shard, seconds } => write!(
                f,
                "Worker error: tree construction for {} did not finish within {}s",
                shard.display(),
                seconds
            ),
            ForestError::WorkerCancelled(shard) => {
                write!(f, "Worker error: tree construction for {} was cancelled", shard.display())
            }
            ForestError::ResultParse { shard, line_number, line, reason } => write!(
                f,
                "Result parse error in {} at line {} (\"{}\"): {}",
                shard, line_number, line, reason
            ),
            ForestError::Reduction(e) => write!(f, "Reduction error: {}", e),
            ForestError::Encoding { path, reason } => {
                write!(f, "Encoding error in {}: {}", path.display(), reason)
            }
            ForestError::Io(e) => write!(f, "IO error: {}", e),
            ForestError::Csv(e) => write!(f, "CSV error: {}", e),
            ForestError::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for ForestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ForestError::Io(e) => Some(e),
            ForestError::Csv(e) => Some(e),
            ForestError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ForestError {
    fn from(err: std::io::Error) -> Self {
        ForestError::Io(err)
    }
}

impl From<csv::Error> for ForestError {
    fn from(err: csv::Error) -> Self {
        ForestError::Csv(err)
    }
}

impl From<serde_json::Error> for ForestError {
    fn from(err: serde_json::Error) -> Self {
        ForestError::Json(err)
    }
}
