//! # TileTune - Tile Plan Autotuning for Block IR
//!
//! A framework for finding good tile shapes of tensor kernels, including:
//! - Tile plan enumeration under a memory budget
//! - Incremental, resumable materialization of tiled blocks
//! - Feature extraction for learned cost models
//! - Boosted-tree cost model inference
//!
//! ## Architecture
//!
//! ```text
//! Program → Plan Generator → plan file → Tile Generator → tiled blocks → build/test
//!                                             ↑                               │
//!                                        Train Status ←───────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tiletune::prelude::*;
//!
//! let mut program = tiletune::load_program(Path::new("conv.json"))?;
//! let config = AutotuneConfig::quick();
//! generate_plans(&program, train_dir, &config.plans)?;
//! if let Some(window) = generate_tiles(&mut program, train_dir, &config.tiles)? {
//!     println!("tiles {}..={}", window.first_tile, window.last_tile);
//! }
//! ```

#![warn(clippy::all)]

pub mod analysis;
pub mod autotuning;
pub mod cost_model;
pub mod ir;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::analysis::{extract_features, feature_hash, ModelKey, FEATURE_HEAD};
    pub use crate::autotuning::{
        generate_plans, generate_tiles, AutotuneConfig, Plan, PlanOptions, TileOptions,
        TileStrategy, TileWindow, TrainStatus,
    };
    pub use crate::cost_model::{CostModelInvoker, MODEL_LIST_FILE};
    pub use crate::ir::{apply_tile, find_target, Affine, Block, Index, Refinement, Statement};
    pub use crate::utils::errors::*;
}

use std::path::Path;
use utils::errors::{TileTuneError, TuneResult};
use utils::file::{read_file, write_file};

/// Read a JSON-serialized program.
pub fn load_program(path: &Path) -> TuneResult<ir::Block> {
    let text = read_file(path)?;
    serde_json::from_str(&text)
        .map_err(|e| TileTuneError::Config(format!("invalid program {}: {}", path.display(), e)))
}

/// Write a program as pretty-printed JSON.
pub fn save_program(path: &Path, program: &ir::Block) -> TuneResult<()> {
    let text = serde_json::to_string_pretty(program)
        .map_err(|e| TileTuneError::Config(format!("cannot serialize program: {}", e)))?;
    write_file(path, &text)?;
    Ok(())
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Block, MAIN_BLOCK};

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_program_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog.json");
        let mut main = Block::new(MAIN_BLOCK);
        main.stmts.push(Block::new("kernel").into());
        save_program(&path, &main).unwrap();
        assert_eq!(load_program(&path).unwrap(), main);

        write_file(&path, "{ not json").unwrap();
        assert!(matches!(load_program(&path), Err(TileTuneError::Config(_))));
    }
}
