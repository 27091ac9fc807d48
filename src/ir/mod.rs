//! Block IR consumed by the autotuner.
//!
//! This module defines the small block tree the tiling passes work on:
//! - Affine: integer affine expressions over named indices
//! - Block / Index / Statement: loop nests and their bodies
//! - Refinement: named memory accesses with shapes
//! - Tiling: the outer/inner split used to materialize tile plans

pub mod affine;
pub mod block;
pub mod refinement;
pub mod tile;

pub use affine::Affine;
pub use block::{
    find_target, find_target_position, Block, Index, Statement, StmtKind, MAIN_BLOCK,
    PADDING_TAG, ZERO_TAG,
};
pub use refinement::{DataType, Extent, RefDir, Refinement, TensorDimension, TensorShape};
pub use tile::{apply_tile, TileShape, Tiling};
