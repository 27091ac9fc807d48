//! Autotuning configuration

use crate::utils::errors::{TileTuneError, TuneResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Default name of the plan file inside the training directory.
pub const DEFAULT_PLAN_FILE: &str = "plans";

/// Options of the plan generator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanOptions {
    /// Plan file name, relative to the training directory
    pub plan_file: String,

    /// Byte budget for the refinements of one tile
    pub max_mem_size: u64,

    /// Round tiled dimensions up to odd sizes before measuring
    pub odd_size: bool,

    /// Allow splitting accumulation indices
    pub acc_idxs: bool,

    /// Only factors that divide the range
    pub only_even: bool,

    /// Only powers of two or the full range
    pub only_po2: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            plan_file: DEFAULT_PLAN_FILE.to_string(),
            max_mem_size: 32 * 1024,
            odd_size: false,
            acc_idxs: true,
            only_even: false,
            only_po2: false,
        }
    }
}

impl PlanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_mem_size(mut self, bytes: u64) -> Self {
        self.max_mem_size = bytes;
        self
    }

    pub fn odd_size(mut self, v: bool) -> Self {
        self.odd_size = v;
        self
    }

    pub fn acc_idxs(mut self, v: bool) -> Self {
        self.acc_idxs = v;
        self
    }

    /// Only factors that divide the range (takes precedence over `only_po2`)
    pub fn only_even(mut self, v: bool) -> Self {
        self.only_even = v;
        self
    }

    pub fn only_po2(mut self, v: bool) -> Self {
        self.only_po2 = v;
        self
    }

    pub fn plan_file(mut self, name: &str) -> Self {
        self.plan_file = name.to_string();
        self
    }
}

/// How a plan is turned into tiled blocks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileStrategy {
    /// One block per refinement, with every other refinement zeroed
    #[default]
    PerRefinement,
    /// One block per plan, covering all refinements
    WholeBlock,
}

impl std::fmt::Display for TileStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TileStrategy::PerRefinement => write!(f, "per-refinement"),
            TileStrategy::WholeBlock => write!(f, "whole-block"),
        }
    }
}

/// Options of the tile/block generator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileOptions {
    /// Plan file name, relative to the training directory
    pub plan_file: String,

    /// Plans per window
    pub max_plans: usize,

    /// Cap on generated blocks per window (0 = no cap)
    pub max_blocks: usize,

    /// Interleave tiles when applying the plan
    pub interleave: bool,

    /// Materialization strategy
    pub strategy: TileStrategy,

    /// Tags for the outer level
    pub outer_set: BTreeSet<String>,

    /// Tags for the middle level
    pub middle_set: BTreeSet<String>,

    /// Tags for the inner level
    pub inner_set: BTreeSet<String>,
}

impl Default for TileOptions {
    fn default() -> Self {
        Self {
            plan_file: DEFAULT_PLAN_FILE.to_string(),
            max_plans: 16,
            max_blocks: 0,
            interleave: false,
            strategy: TileStrategy::PerRefinement,
            outer_set: tags(&["kernel", "tile_outer"]),
            middle_set: tags(&["tile_middle"]),
            inner_set: tags(&["tile_inner"]),
        }
    }
}

impl TileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_plans(mut self, n: usize) -> Self {
        self.max_plans = n;
        self
    }

    pub fn max_blocks(mut self, n: usize) -> Self {
        self.max_blocks = n;
        self
    }

    pub fn interleave(mut self, v: bool) -> Self {
        self.interleave = v;
        self
    }

    pub fn strategy(mut self, strategy: TileStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn plan_file(mut self, name: &str) -> Self {
        self.plan_file = name.to_string();
        self
    }

    /// Plans per window once `max_blocks` is taken into account.
    pub fn window_plans(&self, blocks_per_plan: usize) -> usize {
        let plans = self.max_plans.max(1);
        if self.max_blocks == 0 {
            return plans;
        }
        plans.min((self.max_blocks / blocks_per_plan.max(1)).max(1))
    }
}

fn tags(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Full autotuning configuration, as read from a JSON file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutotuneConfig {
    /// Training directory holding the plan and status files
    pub train_dir: Option<PathBuf>,
    pub plans: PlanOptions,
    pub tiles: TileOptions,
}

impl AutotuneConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: &Path) -> TuneResult<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            TileTuneError::Config(format!("invalid configuration {}: {}", path.display(), e))
        })
    }

    /// Quick preset: few, power-of-two plans per window
    pub fn quick() -> Self {
        Self {
            plans: PlanOptions::default().only_po2(true).acc_idxs(false),
            tiles: TileOptions::default().max_plans(4),
            ..Default::default()
        }
    }

    /// Thorough preset: every factor, wide windows
    pub fn thorough() -> Self {
        Self {
            plans: PlanOptions::default(),
            tiles: TileOptions::default().max_plans(64),
            ..Default::default()
        }
    }

    /// Training directory, or a configuration error if none was given.
    pub fn train_dir(&self) -> TuneResult<&Path> {
        self.train_dir
            .as_deref()
            .ok_or_else(|| TileTuneError::Config("no training directory configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_plans() {
        let opts = TileOptions::default().max_plans(8);
        assert_eq!(opts.window_plans(3), 8);
        let opts = opts.max_blocks(9);
        assert_eq!(opts.window_plans(3), 3);
        assert_eq!(opts.window_plans(20), 1);
    }

    #[test]
    fn test_partial_json() {
        let cfg: AutotuneConfig = serde_json::from_str(
            r#"{ "plans": { "max_mem_size": 4096, "only_po2": true },
                 "tiles": { "strategy": "whole_block", "inner_set": ["vectorize"] } }"#,
        )
        .unwrap();
        assert_eq!(cfg.plans.max_mem_size, 4096);
        assert!(cfg.plans.only_po2);
        assert_eq!(cfg.plans.plan_file, DEFAULT_PLAN_FILE);
        assert_eq!(cfg.tiles.strategy, TileStrategy::WholeBlock);
        assert!(cfg.tiles.inner_set.contains("vectorize"));
        assert_eq!(cfg.tiles.max_plans, 16);
        assert!(cfg.train_dir().is_err());
    }

    #[test]
    fn test_presets() {
        assert!(AutotuneConfig::quick().plans.only_po2);
        assert_eq!(AutotuneConfig::thorough().tiles.max_plans, 64);
    }
}
