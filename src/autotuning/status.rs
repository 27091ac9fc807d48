//! Persisted progress of a training run.
//!
//! Every counter lives in its own plain-text file inside the training
//! directory so that an interrupted run can resume from the last durable
//! state. Tile ids are line numbers of the plan file (scaled by the number
//! of blocks generated per plan).

use crate::analysis::FEATURE_HEAD;
use crate::utils::errors::StatusError;
use crate::utils::file::{append_file, file_exists, read_file, write_file};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const LAST_TESTED_FILE: &str = "last_tested_tile";
pub const FIRST_GENERATED_FILE: &str = "first_generated_tile";
pub const LAST_BUILT_FILE: &str = "last_built_tile";
pub const FAILED_TILE_FILE: &str = "failed_tiles";

/// In-memory view of the failed tile log.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FailedTiles {
    NotLoaded,
    Loaded(BTreeSet<i64>),
}

/// Snapshot of a training directory, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub train_dir: PathBuf,
    pub last_tested_tile: i64,
    pub last_built_tile: i64,
    pub first_generated_tile: Option<i64>,
    pub failed_tiles: Vec<i64>,
}

/// Progress record of one training directory.
#[derive(Debug)]
pub struct TrainStatus {
    train_dir: PathBuf,
    failed: FailedTiles,
}

impl TrainStatus {
    pub fn new(train_dir: impl Into<PathBuf>) -> Self {
        Self {
            train_dir: train_dir.into(),
            failed: FailedTiles::NotLoaded,
        }
    }

    pub fn train_dir(&self) -> &Path {
        &self.train_dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.train_dir.join(name)
    }

    fn read_counter(&self, name: &str) -> Result<Option<i64>, StatusError> {
        let path = self.path(name);
        if !file_exists(&path) {
            return Ok(None);
        }
        let content = read_file(&path).map_err(|source| StatusError::Io {
            path: path.clone(),
            source,
        })?;
        parse_id(&path, &content).map(Some)
    }

    fn write_counter(&self, name: &str, id: i64) -> Result<(), StatusError> {
        let path = self.path(name);
        write_file(&path, &id.to_string()).map_err(|source| StatusError::Io { path, source })
    }

    /// Overwrite a counter that may only move forward.
    fn advance_counter(&self, name: &str, current: Option<i64>, id: i64) -> Result<(), StatusError> {
        if let Some(current) = current {
            if id < current {
                return Err(StatusError::Regression {
                    path: self.path(name),
                    current,
                    requested: id,
                });
            }
        }
        self.write_counter(name, id)
    }

    /// Last tile whose test finished; -1 before any.
    pub fn last_tested_tile(&self) -> Result<i64, StatusError> {
        Ok(self.read_counter(LAST_TESTED_FILE)?.unwrap_or(-1))
    }

    pub fn set_last_tested_tile(&mut self, id: i64) -> Result<(), StatusError> {
        let current = self.read_counter(LAST_TESTED_FILE)?;
        self.advance_counter(LAST_TESTED_FILE, current, id)?;
        debug!("last tested tile: {}", id);
        Ok(())
    }

    /// First tile of the current window. Reading it before any window was
    /// generated is an error.
    pub fn first_generated_tile(&self) -> Result<i64, StatusError> {
        self.read_counter(FIRST_GENERATED_FILE)?
            .ok_or_else(|| StatusError::Missing(self.path(FIRST_GENERATED_FILE)))
    }

    pub fn set_first_generated_tile(&mut self, id: i64) -> Result<(), StatusError> {
        let current = self.read_counter(FIRST_GENERATED_FILE)?;
        self.advance_counter(FIRST_GENERATED_FILE, current, id)?;
        debug!("first generated tile: {}", id);
        Ok(())
    }

    /// Last tile that built; defaults to the last tested tile.
    pub fn last_built_tile(&self) -> Result<i64, StatusError> {
        match self.read_counter(LAST_BUILT_FILE)? {
            Some(id) => Ok(id),
            None => self.last_tested_tile(),
        }
    }

    fn load_failed_tiles(&self) -> Result<BTreeSet<i64>, StatusError> {
        let path = self.path(FAILED_TILE_FILE);
        if !file_exists(&path) {
            return Ok(BTreeSet::new());
        }
        let content = read_file(&path).map_err(|source| StatusError::Io {
            path: path.clone(),
            source,
        })?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| parse_id(&path, line))
            .collect()
    }

    /// Run `f` over the failed set, loading the log on first use.
    fn with_failed_tiles<R>(&mut self, f: impl FnOnce(&BTreeSet<i64>) -> R) -> Result<R, StatusError> {
        if let FailedTiles::Loaded(set) = &self.failed {
            return Ok(f(set));
        }
        let set = self.load_failed_tiles()?;
        let out = f(&set);
        self.failed = FailedTiles::Loaded(set);
        Ok(out)
    }

    /// Record a plan that failed to build or test. Ids already in the log
    /// are not appended again.
    pub fn add_failed_tile(&mut self, id: i64) -> Result<(), StatusError> {
        if self.is_failed_tile(id)? {
            debug!("tile {} already marked as failed", id);
            return Ok(());
        }
        let path = self.path(FAILED_TILE_FILE);
        append_file(&path, &format!("{}\n", id)).map_err(|source| StatusError::Io { path, source })?;
        if let FailedTiles::Loaded(set) = &mut self.failed {
            set.insert(id);
        } else {
            // The log already holds the new id
            self.failed = FailedTiles::Loaded(self.load_failed_tiles()?);
        }
        info!("marked tile {} as failed", id);
        Ok(())
    }

    pub fn is_failed_tile(&mut self, id: i64) -> Result<bool, StatusError> {
        if !file_exists(&self.path(FAILED_TILE_FILE)) {
            return Ok(false);
        }
        self.with_failed_tiles(|set| set.contains(&id))
    }

    /// Treat every tile up to `id` as built and tested.
    pub fn skip_tiles(&mut self, id: i64) -> Result<(), StatusError> {
        self.set_last_tested_tile(id)?;
        self.write_counter(LAST_BUILT_FILE, id)?;
        info!("skipped failed tiles up to {}", id);
        Ok(())
    }

    /// Mark the current window as about to be built.
    pub fn start_build_tiles(&mut self) -> Result<(), StatusError> {
        let first = self.first_generated_tile()?;
        self.write_counter(LAST_BUILT_FILE, first - 1)?;
        debug!("building tiles from {}", first);
        Ok(())
    }

    /// Count one built tile, if `feature` is a feature line.
    pub fn built_one_tile(&mut self, feature: &str) -> Result<bool, StatusError> {
        if !feature.contains(FEATURE_HEAD) {
            return Ok(false);
        }
        let built = self.last_built_tile()? + 1;
        self.write_counter(LAST_BUILT_FILE, built)?;
        debug!("built tile {}", built);
        Ok(true)
    }

    pub fn summary(&mut self) -> Result<StatusSummary, StatusError> {
        let first_generated_tile = self.read_counter(FIRST_GENERATED_FILE)?;
        Ok(StatusSummary {
            train_dir: self.train_dir.clone(),
            last_tested_tile: self.last_tested_tile()?,
            last_built_tile: self.last_built_tile()?,
            first_generated_tile,
            failed_tiles: self.with_failed_tiles(|set| set.iter().copied().collect())?,
        })
    }
}

fn parse_id(path: &Path, content: &str) -> Result<i64, StatusError> {
    content.trim().parse().map_err(|_| StatusError::Parse {
        path: path.to_path_buf(),
        content: content.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut status = TrainStatus::new(dir.path());
        assert_eq!(status.last_tested_tile().unwrap(), -1);
        assert_eq!(status.last_built_tile().unwrap(), -1);
        assert!(!status.is_failed_tile(0).unwrap());
        assert!(matches!(
            status.first_generated_tile(),
            Err(StatusError::Missing(_))
        ));
    }

    #[test]
    fn test_failed_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let mut status = TrainStatus::new(dir.path());
        status.add_failed_tile(5).unwrap();
        assert!(status.is_failed_tile(5).unwrap());
        assert!(!status.is_failed_tile(6).unwrap());
        assert_eq!(read_file(&dir.path().join(FAILED_TILE_FILE)).unwrap(), "5\n");

        status.add_failed_tile(9).unwrap();
        assert!(status.is_failed_tile(9).unwrap());

        // A fresh handle sees the persisted log
        let mut reopened = TrainStatus::new(dir.path());
        assert!(reopened.is_failed_tile(5).unwrap());
        assert!(reopened.is_failed_tile(9).unwrap());
        assert_eq!(reopened.summary().unwrap().failed_tiles, vec![5, 9]);
    }

    #[test]
    fn test_failed_tile_logged_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut status = TrainStatus::new(dir.path());
        status.add_failed_tile(3).unwrap();
        status.add_failed_tile(3).unwrap();
        TrainStatus::new(dir.path()).add_failed_tile(3).unwrap();
        assert_eq!(read_file(&dir.path().join(FAILED_TILE_FILE)).unwrap(), "3\n");
    }

    #[test]
    fn test_skip_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let mut status = TrainStatus::new(dir.path());
        status.set_last_tested_tile(1).unwrap();
        status.set_first_generated_tile(3).unwrap();
        status.start_build_tiles().unwrap();
        status.skip_tiles(2).unwrap();
        assert_eq!(status.last_tested_tile().unwrap(), 2);
        assert_eq!(status.last_built_tile().unwrap(), 2);
        assert!(status.skip_tiles(0).is_err());
    }

    #[test]
    fn test_empty_log_is_loaded_once() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join(FAILED_TILE_FILE), "").unwrap();
        let mut status = TrainStatus::new(dir.path());
        assert!(!status.is_failed_tile(1).unwrap());
        status.add_failed_tile(1).unwrap();
        assert!(status.is_failed_tile(1).unwrap());
    }

    #[test]
    fn test_monotonic_counters() {
        let dir = tempfile::tempdir().unwrap();
        let mut status = TrainStatus::new(dir.path());
        status.set_last_tested_tile(3).unwrap();
        status.set_last_tested_tile(3).unwrap();
        let err = status.set_last_tested_tile(2).unwrap_err();
        assert!(matches!(err, StatusError::Regression { current: 3, requested: 2, .. }));
        assert_eq!(status.last_tested_tile().unwrap(), 3);

        status.set_first_generated_tile(4).unwrap();
        assert!(status.set_first_generated_tile(0).is_err());
        assert_eq!(status.first_generated_tile().unwrap(), 4);
    }

    #[test]
    fn test_build_progress() {
        let dir = tempfile::tempdir().unwrap();
        let mut status = TrainStatus::new(dir.path());
        status.set_last_tested_tile(7).unwrap();
        assert_eq!(status.last_built_tile().unwrap(), 7);

        status.set_first_generated_tile(8).unwrap();
        status.start_build_tiles().unwrap();
        assert_eq!(status.last_built_tile().unwrap(), 7);

        assert!(status.built_one_tile("16 4 FEATURES:2 2 32 0").unwrap());
        assert!(!status.built_one_tile("kernel main").unwrap());
        assert!(status.built_one_tile("FEATURES:").unwrap());
        assert_eq!(status.last_built_tile().unwrap(), 9);
        assert_eq!(read_file(&dir.path().join(LAST_BUILT_FILE)).unwrap(), "9");
    }

    #[test]
    fn test_corrupt_counter() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join(LAST_TESTED_FILE), "seven").unwrap();
        let status = TrainStatus::new(dir.path());
        assert!(matches!(status.last_tested_tile(), Err(StatusError::Parse { .. })));
    }
}
