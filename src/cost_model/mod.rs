//! Cost model invocation.
//!
//! A model directory holds a catalogue file listing, for every structural
//! model key, the model trained for blocks of that shape:
//! ```text
//! 2 2
//! store_rank2.json
//! 1 2
//! load_rank2.json
//! ```
//! The invoker loads every listed model up front and answers predictions by
//! key. Keys without a model simply yield no prediction.

mod booster;

pub use booster::{Booster, Objective};

use crate::analysis::{extract_features, ModelKey};
use crate::utils::errors::{CostModelError, TuneResult};
use log::{debug, info};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default catalogue file name inside the model directory.
pub const MODEL_LIST_FILE: &str = "model_list";

/// Parse a model catalogue into `(key, model file)` pairs.
pub fn parse_catalogue(path: &Path, text: &str) -> Result<Vec<(ModelKey, String)>, CostModelError> {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let mut entries = Vec::with_capacity(lines.len() / 2);
    for (n, pair) in lines.chunks(2).enumerate() {
        let line = n * 2;
        let key: ModelKey = pair[0].parse().map_err(|e| CostModelError::MalformedCatalogue {
            path: path.to_path_buf(),
            line,
            reason: format!("{}", e),
        })?;
        let file = match pair.get(1).map(|f| f.trim()) {
            Some(file) if !file.is_empty() => file,
            _ => {
                return Err(CostModelError::MalformedCatalogue {
                    path: path.to_path_buf(),
                    line: line + 1,
                    reason: format!("no model file for key '{}'", key),
                })
            }
        };
        entries.push((key, file.to_string()));
    }
    Ok(entries)
}

/// Boosted-tree models indexed by model key.
#[derive(Debug)]
pub struct CostModelInvoker {
    model_dir: PathBuf,
    boosters: BTreeMap<ModelKey, Booster>,
}

impl CostModelInvoker {
    /// Load every model listed in `model_dir/model_list`.
    pub fn load(model_dir: &Path, model_list: &str) -> Result<Self, CostModelError> {
        let list_path = model_dir.join(model_list);
        let text = fs::read_to_string(&list_path).map_err(|source| CostModelError::Catalogue {
            path: list_path.clone(),
            source,
        })?;
        let mut boosters = BTreeMap::new();
        for (key, file) in parse_catalogue(&list_path, &text)? {
            let booster = Booster::load(&model_dir.join(&file))?;
            debug!("loaded model for key [{}] from {} ({} trees)", key, file, booster.num_trees());
            boosters.insert(key, booster);
        }
        info!("loaded {} cost models from {}", boosters.len(), model_dir.display());
        Ok(Self {
            model_dir: model_dir.to_path_buf(),
            boosters,
        })
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn model_key_exists(&self, key: &ModelKey) -> bool {
        self.boosters.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ModelKey> {
        self.boosters.keys()
    }

    pub fn len(&self) -> usize {
        self.boosters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boosters.is_empty()
    }

    /// Predict with the model of `key`.
    ///
    /// Returns `None` when no model is registered for the key. The slice
    /// borrows the model's output buffer and is valid until the next call.
    pub fn predict(
        &mut self,
        key: &ModelKey,
        features: &[f32],
        n_rows: usize,
        n_columns: usize,
    ) -> Result<Option<&[f32]>, CostModelError> {
        match self.boosters.get_mut(key) {
            Some(booster) => booster.predict(features, n_rows, n_columns).map(Some),
            None => {
                debug!("no cost model for key [{}]", key);
                Ok(None)
            }
        }
    }

    /// Predict the score of a block from its stamped feature comment.
    pub fn predict_comment(&mut self, comment: &str) -> TuneResult<Option<f32>> {
        let (key, features) = extract_features(comment)?;
        let n_columns = features.len();
        let prediction = self.predict(&key, &features, 1, n_columns)?;
        Ok(prediction.and_then(|values| values.first().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::booster::tests::stump_model;
    use super::*;
    use crate::utils::file::write_file;

    fn model_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a.json"), &stump_model("reg:squarederror", "5E-1")).unwrap();
        write_file(&dir.path().join("b.json"), &stump_model("reg:squarederror", "0")).unwrap();
        write_file(&dir.path().join(MODEL_LIST_FILE), "2 2\na.json\n1 8 3\nb.json\n\n").unwrap();
        dir
    }

    #[test]
    fn test_load_and_predict() {
        let dir = model_dir();
        let mut invoker = CostModelInvoker::load(dir.path(), MODEL_LIST_FILE).unwrap();
        assert_eq!(invoker.len(), 2);
        let key = ModelKey(vec![2, 2]);
        assert!(invoker.model_key_exists(&key));
        assert!(!invoker.model_key_exists(&ModelKey(vec![2])));

        let out = invoker.predict(&key, &[5.0, 1.0], 1, 2).unwrap().unwrap();
        assert_eq!(out, &[3.75]);
        let other = ModelKey(vec![1, 8, 3]);
        assert_eq!(invoker.predict(&other, &[5.0, 1.0], 1, 2).unwrap().unwrap(), &[3.25]);
        assert!(invoker.predict(&ModelKey(vec![9]), &[1.0], 1, 1).unwrap().is_none());
    }

    #[test]
    fn test_predict_comment() {
        let dir = model_dir();
        let mut invoker = CostModelInvoker::load(dir.path(), MODEL_LIST_FILE).unwrap();
        let score = invoker.predict_comment("4 2 FEATURES:2 2 5 1").unwrap();
        assert_eq!(score, Some(3.75));
        assert_eq!(invoker.predict_comment("4 2 FEATURES:3 1 5 1").unwrap(), None);
    }

    #[test]
    fn test_missing_catalogue() {
        let dir = tempfile::tempdir().unwrap();
        let err = CostModelInvoker::load(dir.path(), MODEL_LIST_FILE).unwrap_err();
        assert!(matches!(err, CostModelError::Catalogue { .. }));
    }

    #[test]
    fn test_missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join(MODEL_LIST_FILE), "2 2\nmissing.json\n").unwrap();
        let err = CostModelInvoker::load(dir.path(), MODEL_LIST_FILE).unwrap_err();
        assert!(matches!(err, CostModelError::Model { .. }));
    }

    #[test]
    fn test_malformed_catalogue() {
        let path = Path::new("model_list");
        let entries = parse_catalogue(path, "1 2\nx.json\n").unwrap();
        assert_eq!(entries, vec![(ModelKey(vec![1, 2]), "x.json".to_string())]);

        match parse_catalogue(path, "1 2\nx.json\n3 4\n").unwrap_err() {
            CostModelError::MalformedCatalogue { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error {other}"),
        }
        match parse_catalogue(path, "1 z\nx.json\n").unwrap_err() {
            CostModelError::MalformedCatalogue { line, .. } => assert_eq!(line, 0),
            other => panic!("unexpected error {other}"),
        }
    }
}
