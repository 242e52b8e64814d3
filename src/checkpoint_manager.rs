use crate::phase::Phase;
use crate::ForestError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Progress of a run, persisted after every completed phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_completed: Phase,
    /// Seconds since the unix epoch.
    pub saved_at: u64,
}

impl Checkpoint {
    pub fn new(last_completed: Phase) -> Self {
        let saved_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            last_completed,
            saved_at,
        }
    }

    /// Phase a resumed run starts from.
    pub fn resume_phase(&self) -> Phase {
        self.last_completed.next().unwrap_or(Phase::Ending)
    }
}

/// Manages checkpoint save/load for one main directory
pub struct CheckpointManager {
    path: PathBuf,
    temp_path: PathBuf,
}

impl CheckpointManager {
    pub fn new(path: &Path) -> Self {
        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        Self {
            path: path.to_path_buf(),
            temp_path: PathBuf::from(temp),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save a checkpoint atomically
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), ForestError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Leftover from a failed save
        if self.temp_path.exists() {
            fs::remove_file(&self.temp_path)?;
        }
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        fs::write(&self.temp_path, bytes)?;
        fs::rename(&self.temp_path, &self.path)?;

        info!("[checkpoint] saved after {}", checkpoint.last_completed);
        Ok(())
    }

    /// Load the checkpoint if one exists
    pub fn load(&self) -> Result<Option<Checkpoint>, ForestError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)?;
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        info!("[checkpoint] loaded, last completed phase {}", checkpoint.last_completed);
        Ok(Some(checkpoint))
    }

    pub fn clear(&self) -> Result<(), ForestError> {
        for path in [&self.path, &self.temp_path] {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}
