//! Durable harvest progress records.
//!
//! The checkpoint is the single source of truth for "where do I resume":
//! per source, how many posts have been captured all-time and which window
//! index is currently being drained. It is written exactly once per
//! successful run, never mid-run, so a crash resumes from the previous
//! run's boundary instead of a half-updated one. Writes go through a temp
//! file in the same directory followed by a rename, so the previous valid
//! checkpoint survives a crash mid-write.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Progress for one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProgress {
    /// Posts captured all-time.
    pub fetched: u64,
    /// Index into the window schedule currently being drained.
    /// Monotonically non-decreasing; past the schedule end means the
    /// source is fully backfilled.
    pub window_index: usize,
}

/// The full progress record persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Date (`%Y-%m-%d`) of the last successful run; drives the
    /// re-entrancy guard.
    pub last_run_date: Option<String>,
    pub total_fetched: u64,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceProgress>,
}

/// Checkpoint persistence over a JSON file.
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint, or a fresh one when the file does not exist.
    pub fn load(&self) -> Result<Checkpoint> {
        if !self.path.exists() {
            return Ok(Checkpoint::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read checkpoint: {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Corrupt checkpoint file: {}", self.path.display()))
    }

    /// Atomically replace the checkpoint (write temp file, then rename).
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;

        let mut tmp = NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
        serde_json::to_writer_pretty(&mut tmp, checkpoint)?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to replace checkpoint: {}", self.path.display()))?;
        Ok(())
    }

    /// Remove the checkpoint so the next run restarts the backfill.
    /// Returns whether a file existed.
    pub fn reset(&self) -> Result<bool> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove {}", self.path.display()))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn checkpoint_in(dir: &TempDir) -> CheckpointFile {
        CheckpointFile::new(dir.path().join("progress.json"))
    }

    #[test]
    fn missing_file_loads_fresh_checkpoint() {
        let dir = TempDir::new().unwrap();
        let file = checkpoint_in(&dir);
        let checkpoint = file.load().unwrap();
        assert_eq!(checkpoint, Checkpoint::default());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = TempDir::new().unwrap();
        let file = checkpoint_in(&dir);

        let mut checkpoint = Checkpoint {
            last_run_date: Some("2026-08-06".to_string()),
            total_fetched: 42,
            ..Default::default()
        };
        checkpoint.sources.insert(
            "vosfinances".to_string(),
            SourceProgress {
                fetched: 42,
                window_index: 2,
            },
        );

        file.save(&checkpoint).unwrap();
        assert_eq!(file.load().unwrap(), checkpoint);
    }

    #[test]
    fn save_replaces_previous_checkpoint() {
        let dir = TempDir::new().unwrap();
        let file = checkpoint_in(&dir);

        file.save(&Checkpoint {
            total_fetched: 1,
            ..Default::default()
        })
        .unwrap();
        file.save(&Checkpoint {
            total_fetched: 2,
            ..Default::default()
        })
        .unwrap();

        assert_eq!(file.load().unwrap().total_fetched, 2);
        // Only the checkpoint itself remains; no temp files left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn save_creates_missing_parent_directories() {
        let dir = TempDir::new().unwrap();
        let file = CheckpointFile::new(dir.path().join("nested/data/progress.json"));
        file.save(&Checkpoint::default()).unwrap();
        assert!(file.path().exists());
    }

    #[test]
    fn reset_removes_the_file() {
        let dir = TempDir::new().unwrap();
        let file = checkpoint_in(&dir);

        assert!(!file.reset().unwrap());
        file.save(&Checkpoint::default()).unwrap();
        assert!(file.reset().unwrap());
        assert!(!file.path().exists());
    }

    #[test]
    fn corrupt_checkpoint_is_an_error_not_a_silent_reset() {
        let dir = TempDir::new().unwrap();
        let file = checkpoint_in(&dir);
        std::fs::write(file.path(), "{ not json").unwrap();
        assert!(file.load().is_err());
    }
}
