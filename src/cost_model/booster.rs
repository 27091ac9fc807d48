//! Gradient-boosted tree ensembles.
//!
//! Models are read from the JSON format written by XGBoost's
//! `save_model("model.json")`. Only single-output tree boosters (`gbtree`
//! and `dart`) are supported. A feature value of `0.0` or NaN counts as
//! missing and follows the default direction of the split.

use crate::utils::errors::CostModelError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Deserialize)]
struct ModelFile {
    learner: Learner,
}

#[derive(Deserialize)]
struct Learner {
    gradient_booster: GradientBooster,
    #[serde(default)]
    learner_model_param: LearnerModelParam,
    objective: ObjectiveParam,
}

#[derive(Deserialize, Default)]
struct LearnerModelParam {
    #[serde(default)]
    base_score: String,
    #[serde(default)]
    num_class: String,
}

#[derive(Deserialize)]
struct ObjectiveParam {
    name: String,
}

#[derive(Deserialize)]
struct GradientBooster {
    name: String,
    #[serde(default)]
    model: Option<TreeEnsemble>,
    /// Inner booster of a `dart` model
    #[serde(default)]
    gbtree: Option<Box<GradientBooster>>,
    #[serde(default)]
    weight_drop: Vec<f32>,
}

#[derive(Deserialize)]
struct TreeEnsemble {
    trees: Vec<TreeParam>,
    #[serde(default)]
    tree_info: Vec<i64>,
}

#[derive(Deserialize)]
struct TreeParam {
    left_children: Vec<i64>,
    right_children: Vec<i64>,
    split_indices: Vec<u64>,
    split_conditions: Vec<f32>,
    default_left: Vec<Flag>,
}

/// Older models store flags as integers, newer ones as booleans.
#[derive(Deserialize, Clone, Copy)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    fn is_set(self) -> bool {
        match self {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        }
    }
}

/// Transform from the summed margin to the prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    Identity,
    Logistic,
    Exp,
}

impl Objective {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "reg:squarederror" | "reg:linear" | "reg:absoluteerror" | "reg:pseudohubererror"
            | "binary:logitraw" => Some(Objective::Identity),
            "binary:logistic" | "reg:logistic" => Some(Objective::Logistic),
            "count:poisson" | "reg:gamma" | "reg:tweedie" => Some(Objective::Exp),
            _ => None,
        }
    }

    fn transform(self, margin: f32) -> f32 {
        match self {
            Objective::Identity => margin,
            Objective::Logistic => 1.0 / (1.0 + (-margin).exp()),
            Objective::Exp => margin.exp(),
        }
    }
}

/// Base margin from the stored base score.
fn base_margin(objective_name: &str, base_score: f32) -> f32 {
    match objective_name {
        "binary:logistic" | "reg:logistic" | "binary:logitraw" => {
            let p = base_score.clamp(f32::EPSILON, 1.0 - f32::EPSILON);
            (p / (1.0 - p)).ln()
        }
        "count:poisson" | "reg:gamma" | "reg:tweedie" => base_score.max(f32::MIN_POSITIVE).ln(),
        _ => base_score,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(f32),
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
        default_left: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn from_param(param: TreeParam) -> Result<Self, String> {
        let n = param.left_children.len();
        if param.right_children.len() != n
            || param.split_indices.len() != n
            || param.split_conditions.len() != n
            || param.default_left.len() != n
        {
            return Err("tree arrays have different lengths".to_string());
        }
        if n == 0 {
            return Err("empty tree".to_string());
        }
        let mut nodes = Vec::with_capacity(n);
        for i in 0..n {
            let (left, right) = (param.left_children[i], param.right_children[i]);
            if left == -1 {
                nodes.push(Node::Leaf(param.split_conditions[i]));
                continue;
            }
            // Children always follow their parent, so evaluation terminates
            let child = |c: i64| -> Result<usize, String> {
                if c > i as i64 && (c as usize) < n {
                    Ok(c as usize)
                } else {
                    Err(format!("node {} has invalid child {}", i, c))
                }
            };
            nodes.push(Node::Split {
                feature: param.split_indices[i] as usize,
                threshold: param.split_conditions[i],
                left: child(left)?,
                right: child(right)?,
                default_left: param.default_left[i].is_set(),
            });
        }
        Ok(Self { nodes })
    }

    fn leaf_value(&self, row: &[f32]) -> f32 {
        let mut n = 0;
        loop {
            match self.nodes[n] {
                Node::Leaf(value) => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    default_left,
                } => {
                    let value = row[feature];
                    let go_left = if value == 0.0 || value.is_nan() {
                        default_left
                    } else {
                        value < threshold
                    };
                    n = if go_left { left } else { right };
                }
            }
        }
    }

    fn max_feature(&self) -> Option<usize> {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                Node::Split { feature, .. } => Some(*feature),
                Node::Leaf(_) => None,
            })
            .max()
    }
}

/// A loaded tree ensemble with a reusable output buffer.
#[derive(Debug, Clone)]
pub struct Booster {
    path: PathBuf,
    trees: Vec<Tree>,
    tree_weights: Vec<f32>,
    base_margin: f32,
    objective: Objective,
    num_features: usize,
    output: Vec<f32>,
}

impl Booster {
    /// Load a model file.
    pub fn load(path: &Path) -> Result<Self, CostModelError> {
        let text = fs::read_to_string(path).map_err(|e| CostModelError::Model {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json(path, &text)
    }

    /// Parse a model from its JSON text; `path` only names it in errors.
    pub fn from_json(path: &Path, text: &str) -> Result<Self, CostModelError> {
        Self::parse(path, text).map_err(|reason| CostModelError::Model {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn parse(path: &Path, text: &str) -> Result<Self, String> {
        let file: ModelFile = serde_json::from_str(text).map_err(|e| e.to_string())?;
        let learner = file.learner;

        let num_class: u64 = parse_param(&learner.learner_model_param.num_class)?.map_or(0, |v| v as u64);
        if num_class > 1 {
            return Err(format!("multi-class models are not supported ({} classes)", num_class));
        }
        let objective_name = learner.objective.name.as_str();
        let objective = Objective::from_name(objective_name)
            .ok_or_else(|| format!("unsupported objective '{}'", objective_name))?;
        let base_score = parse_param(&learner.learner_model_param.base_score)?.unwrap_or(0.5);

        let (ensemble, weight_drop) = match learner.gradient_booster.name.as_str() {
            "gbtree" => (learner.gradient_booster.model, Vec::new()),
            "dart" => {
                let inner = learner
                    .gradient_booster
                    .gbtree
                    .ok_or_else(|| "dart model without inner gbtree".to_string())?;
                (inner.model, learner.gradient_booster.weight_drop)
            }
            other => return Err(format!("unsupported booster '{}'", other)),
        };
        let ensemble = ensemble.ok_or_else(|| "booster has no tree model".to_string())?;
        if ensemble.tree_info.iter().any(|&group| group != 0) {
            return Err("multi-output models are not supported".to_string());
        }

        let trees = ensemble
            .trees
            .into_iter()
            .enumerate()
            .map(|(i, t)| Tree::from_param(t).map_err(|e| format!("tree {}: {}", i, e)))
            .collect::<Result<Vec<_>, _>>()?;
        let tree_weights = if weight_drop.is_empty() {
            vec![1.0; trees.len()]
        } else if weight_drop.len() == trees.len() {
            weight_drop
        } else {
            return Err(format!(
                "{} dart weights for {} trees",
                weight_drop.len(),
                trees.len()
            ));
        };
        let num_features = trees.iter().filter_map(Tree::max_feature).max().map_or(0, |f| f + 1);

        Ok(Self {
            path: path.to_path_buf(),
            trees,
            tree_weights,
            base_margin: base_margin(objective_name, base_score),
            objective,
            num_features,
            output: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Minimum number of feature columns the model reads.
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    /// Predict one value per row of a row-major `n_rows x n_columns` matrix.
    ///
    /// The returned slice stays valid until the next call.
    pub fn predict(&mut self, features: &[f32], n_rows: usize, n_columns: usize) -> Result<&[f32], CostModelError> {
        if n_rows.checked_mul(n_columns) != Some(features.len()) {
            return Err(CostModelError::FeatureShape {
                len: features.len(),
                rows: n_rows,
                columns: n_columns,
            });
        }
        if n_columns < self.num_features {
            return Err(CostModelError::TooFewColumns {
                needed: self.num_features,
                columns: n_columns,
            });
        }
        self.output.clear();
        for r in 0..n_rows {
            let row = &features[r * n_columns..(r + 1) * n_columns];
            let margin = self
                .trees
                .iter()
                .zip(&self.tree_weights)
                .fold(self.base_margin, |acc, (tree, w)| acc + w * tree.leaf_value(row));
            self.output.push(self.objective.transform(margin));
        }
        Ok(&self.output)
    }
}

/// Parse a numeric model parameter, stored as `"5E-1"` or `"[5E-1]"`.
fn parse_param(raw: &str) -> Result<Option<f32>, String> {
    let trimmed = raw.trim().trim_start_matches('[').trim_end_matches(']').trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<f32>()
        .map(Some)
        .map_err(|_| format!("invalid model parameter '{}'", raw))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two stumps: `x0 < 2 ? 1 : 3` (missing left) and `x1 < 0.5 ? -0.25 : 0.25`.
    pub(crate) fn stump_model(objective: &str, base_score: &str) -> String {
        format!(
            r#"{{
  "learner": {{
    "gradient_booster": {{
      "name": "gbtree",
      "model": {{
        "trees": [
          {{ "left_children": [1, -1, -1], "right_children": [2, -1, -1],
             "split_indices": [0, 0, 0], "split_conditions": [2.0, 1.0, 3.0],
             "default_left": [1, 0, 0] }},
          {{ "left_children": [1, -1, -1], "right_children": [2, -1, -1],
             "split_indices": [1, 0, 0], "split_conditions": [0.5, -0.25, 0.25],
             "default_left": [false, false, false] }}
        ],
        "tree_info": [0, 0]
      }}
    }},
    "learner_model_param": {{ "base_score": "{}", "num_class": "0", "num_feature": "2" }},
    "objective": {{ "name": "{}" }}
  }},
  "version": [1, 7, 6]
}}"#,
            base_score, objective
        )
    }

    fn load(text: &str) -> Booster {
        Booster::from_json(Path::new("model.json"), text).unwrap()
    }

    #[test]
    fn test_regression() {
        let mut booster = load(&stump_model("reg:squarederror", "5E-1"));
        assert_eq!(booster.num_trees(), 2);
        assert_eq!(booster.num_features(), 2);
        let out = booster.predict(&[1.0, 1.0, 5.0, 0.2, 0.0, 0.0], 3, 2).unwrap();
        assert_eq!(out, &[1.75, 3.25, 1.75]);
    }

    #[test]
    fn test_logistic_and_bracketed_base_score() {
        let mut booster = load(&stump_model("binary:logistic", "[5E-1]"));
        assert_eq!(booster.objective(), Objective::Logistic);
        let out = booster.predict(&[5.0, 1.0], 1, 2).unwrap();
        let expected = 1.0 / (1.0 + (-3.25f32).exp());
        assert!((out[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_shape_errors() {
        let mut booster = load(&stump_model("reg:squarederror", "0"));
        assert!(matches!(
            booster.predict(&[1.0, 2.0, 3.0], 2, 2),
            Err(CostModelError::FeatureShape { .. })
        ));
        assert!(matches!(
            booster.predict(&[1.0], 1, 1),
            Err(CostModelError::TooFewColumns { needed: 2, columns: 1 })
        ));
        // Extra columns are ignored
        assert_eq!(booster.predict(&[1.0, 1.0, 9.0], 1, 3).unwrap(), &[1.25]);
    }

    #[test]
    fn test_rejected_models() {
        let multi = stump_model("reg:squarederror", "0.5").replace("\"num_class\": \"0\"", "\"num_class\": \"3\"");
        assert!(Booster::from_json(Path::new("m"), &multi).is_err());
        let unknown = stump_model("rank:pairwise", "0.5");
        assert!(Booster::from_json(Path::new("m"), &unknown).is_err());
        let cyclic = stump_model("reg:squarederror", "0.5").replacen(
            "\"left_children\": [1, -1, -1]",
            "\"left_children\": [0, -1, -1]",
            1,
        );
        assert!(Booster::from_json(Path::new("m"), &cyclic).is_err());
        assert!(Booster::from_json(Path::new("m"), "{}").is_err());
    }
}
