//! Tile-size Auto-Tuning
//!
//! Drives the search for good tile shapes of a program's target block.
//!
//! # Workflow
//!
//! - **Plan generation**: enumerate every tile plan that fits the memory
//!   budget and write them to the plan file of the training directory
//! - **Tile generation**: each iteration materializes the next window of
//!   plans as tiled blocks, with their features stamped in the comments
//! - **Train status**: the external build/test pipeline reports progress
//!   back, failed plans are skipped from then on
//!
//! # Example
//!
//! ```ignore
//! use tiletune::autotuning::{generate_plans, generate_tiles, AutotuneConfig, TrainStatus};
//!
//! let config = AutotuneConfig::quick();
//! let train_dir = Path::new("train/conv1");
//! generate_plans(&program, train_dir, &config.plans)?;
//! let mut tiled = program.clone();
//! while let Some(window) = generate_tiles(&mut tiled, train_dir, &config.tiles)? {
//!     let mut status = TrainStatus::new(train_dir);
//!     status.start_build_tiles()?;
//!     for block in &window.blocks {
//!         build(block)?;
//!         status.built_one_tile(&block.comments)?;
//!     }
//!     run_tests(&tiled)?;
//!     status.set_last_tested_tile(window.last_tile)?;
//!     tiled = program.clone();
//! }
//! ```

mod config;
pub mod plans;
pub mod status;
pub mod tiles;

pub use config::{AutotuneConfig, PlanOptions, TileOptions, TileStrategy, DEFAULT_PLAN_FILE};
pub use plans::{generate_plans, tile_candidates, Plan, PlanFile, TilePlanGenerator, PO2_SMALL_RANGE};
pub use status::{StatusSummary, TrainStatus};
pub use tiles::{generate_tiles, plan_window, BlockGenerator, TileWindow, WindowPlan};
