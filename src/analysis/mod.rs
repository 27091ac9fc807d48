//! Analysis of tiled blocks.

pub mod features;

pub use features::{
    block_features, block_model_key, extract_features, feature_hash, model_key_from_block,
    ordered_index, ordered_refinements, ref_features, ref_features_str, stmt_features,
    tiled_block_features, tiled_block_features_str, tiled_program_features_str, BlockFeatures,
    ModelKey, FEATURE_HEAD,
};

use crate::ir::{find_target, Block};
use crate::utils::errors::TuneResult;

/// Feature string of the untiled target block of a program.
///
/// Both levels are the target itself; hashing this string identifies the
/// target across invocations.
pub fn target_features_str(program: &Block) -> TuneResult<String> {
    let target = find_target(program)?;
    let idxs = ordered_index(target);
    let refs = ordered_refinements(target);
    Ok(tiled_program_features_str(target, target, &idxs, &refs))
}
