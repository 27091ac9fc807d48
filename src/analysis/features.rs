//! Feature extraction for tiled blocks.
//!
//! Two feature families are produced:
//! - per-refinement features of an innermost tile, `3n + 2` integers for a
//!   refinement of rank `n`: total tiled elements, number of constraints,
//!   then `(stride, extent.min, extent.max)` per access dimension;
//! - per-block features of a tiled program: index ranges followed by the
//!   flat access coefficients of every input and then every output
//!   refinement, in a fixed index/refinement ordering.
//!
//! Each family comes with a `ModelKey` selecting the cost model trained for
//! that feature layout.

use crate::ir::{Block, Refinement};
use crate::utils::errors::{FeatureError, FeatureErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use xxhash_rust::xxh3::xxh3_64;

/// Marker preceding the features in a block comment.
pub const FEATURE_HEAD: &str = "FEATURES:";

/// Separates rows of a rendered `BlockFeatures`.
pub const ROW_SEPARATOR: char = ';';

/// Terminates each section of a tiled program feature string.
pub const SECTION_TERMINATOR: char = '.';

/// Structural signature selecting a cost model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey(pub Vec<u64>);

impl ModelKey {
    pub fn new(values: Vec<u64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        write!(f, "{}", parts.join(" "))
    }
}

impl FromStr for ModelKey {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split_whitespace()
            .map(|tok| {
                tok.parse::<u64>().map_err(|_| {
                    FeatureError::new(
                        FeatureErrorKind::MalformedModelKey,
                        format!("'{}' in model key '{}' is not a non-negative integer", tok, s),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if values.is_empty() {
            return Err(FeatureError::new(FeatureErrorKind::MalformedModelKey, "empty model key"));
        }
        Ok(ModelKey(values))
    }
}

/// Canonical string hash (XXH3-64, seed 0) of a rendered feature string.
pub fn feature_hash(features: &str) -> u64 {
    xxh3_64(features.as_bytes())
}

/// Features of one refinement of `block`.
pub fn ref_features(block: &Block, r: &Refinement) -> Vec<i64> {
    let n_dim = r.rank();
    let mut features = vec![0i64; n_dim * 3 + 2];
    let extents = r.extents(&block.idxs);
    let mut total = 1i64;
    for (d, ext) in extents.iter().enumerate() {
        let base = 2 + d * 3;
        features[base] = r.interior_shape.dims.get(d).map(|dim| dim.stride).unwrap_or(0);
        features[base + 1] = ext.min;
        features[base + 2] = ext.max;
        total *= ext.width();
    }
    features[0] = total;
    features[1] = block.constraints.len() as i64;
    features
}

pub fn ref_features_str(block: &Block, r: &Refinement) -> String {
    join(&ref_features(block, r))
}

/// The only refinement of `block` whose access depends on an index.
fn target_refinement(block: &Block) -> Result<&Refinement, FeatureError> {
    let mut live = block.refs.iter().filter(|r| r.is_indexed());
    let target = live.next().ok_or_else(|| {
        FeatureError::new(
            FeatureErrorKind::NoTargetRefinement,
            format!("no refinement with non-zero access in block '{}'", block.name),
        )
    })?;
    if let Some(other) = live.next() {
        return Err(FeatureError::new(
            FeatureErrorKind::AmbiguousTargetRefinement,
            format!(
                "ambiguous target refinement in block '{}': both '{}' and '{}' have non-zero access",
                block.name, target.into, other.into
            ),
        ));
    }
    Ok(target)
}

/// Model key of a block isolating a single refinement: its rank.
pub fn model_key_from_block(block: &Block) -> Result<ModelKey, FeatureError> {
    let target = target_refinement(block)?;
    Ok(ModelKey(vec![target.rank() as u64]))
}

/// Features of an innermost tile with a single live refinement.
///
/// The model key is `(direction code, rank)` of that refinement.
pub fn tiled_block_features(block: &Block) -> Result<(Vec<i64>, ModelKey), FeatureError> {
    let target = target_refinement(block)?;
    let key = ModelKey(vec![target.dir.code(), target.rank() as u64]);
    Ok((ref_features(block, target), key))
}

/// `tiled_block_features` rendered as `key... features...`.
pub fn tiled_block_features_str(block: &Block) -> Result<String, FeatureError> {
    let (features, key) = tiled_block_features(block)?;
    let mut out = key.to_string();
    for f in features {
        out.push(' ');
        out.push_str(&f.to_string());
    }
    Ok(out)
}

/// Tileable index names, in declaration order.
pub fn ordered_index(block: &Block) -> Vec<String> {
    block.tileable_idxs().map(|i| i.name.clone()).collect()
}

/// Refinement names by ascending rank, ties kept in declaration order.
pub fn ordered_refinements(block: &Block) -> Vec<String> {
    let mut refs: Vec<&Refinement> = block.refs.iter().collect();
    refs.sort_by_key(|r| r.rank());
    refs.into_iter().map(|r| r.into.clone()).collect()
}

/// Index ranges and access coefficients of one level of a tiled program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFeatures {
    pub index_ranges: Vec<i64>,
    /// One row per input refinement
    pub inputs: Vec<Vec<i64>>,
    /// One row per output refinement
    pub outputs: Vec<Vec<i64>>,
}

impl BlockFeatures {
    /// Number of rows: the index row plus one per refinement.
    pub fn rows(&self) -> usize {
        1 + self.inputs.len() + self.outputs.len()
    }

    pub fn columns(&self) -> usize {
        self.index_ranges.len()
    }

    /// All rows concatenated.
    pub fn flatten(&self) -> Vec<i64> {
        let mut out = self.index_ranges.clone();
        for row in self.inputs.iter().chain(&self.outputs) {
            out.extend_from_slice(row);
        }
        out
    }

    /// `ranges;row;row...`
    pub fn render(&self) -> String {
        let mut rows = vec![join(&self.index_ranges)];
        rows.extend(self.inputs.iter().chain(&self.outputs).map(|r| join(r)));
        rows.join(&ROW_SEPARATOR.to_string())
    }
}

/// Per-block features of `block` in the given index and refinement order.
pub fn block_features(block: &Block, sorted_idxs: &[String], sorted_refs: &[String]) -> BlockFeatures {
    let index_ranges = sorted_idxs
        .iter()
        .map(|name| block.idx_by_name(name).map(|i| i.range as i64).unwrap_or(0))
        .collect();
    let mut features = BlockFeatures {
        index_ranges,
        ..Default::default()
    };
    for name in sorted_refs {
        let Some(r) = block.ref_by_into(name) else {
            continue;
        };
        let flat = r.flat_access();
        let row: Vec<i64> = sorted_idxs.iter().map(|idx| flat.get(idx)).collect();
        if r.is_output() {
            features.outputs.push(row);
        } else if r.dir == crate::ir::RefDir::In {
            features.inputs.push(row);
        }
    }
    features
}

/// Statement kind counts of the innermost block.
pub fn stmt_features(block: &Block) -> Vec<u64> {
    let mut innermost = block;
    while let Some(sub) = innermost.sub_block(0) {
        innermost = sub;
    }
    innermost.stmt_kind_counts()
}

/// Model key of a whole tiled program: statement kinds, then the shape of
/// the outer feature matrix (`#refinements + 1`, `#indices`).
pub fn block_model_key(outer: &BlockFeatures, stmts: &[u64]) -> ModelKey {
    let mut key = stmts.to_vec();
    key.push(outer.rows() as u64);
    key.push(outer.columns() as u64);
    ModelKey(key)
}

/// Feature string of a tiled program: `stmts.outer.inner.`
pub fn tiled_program_features_str(
    outer: &Block,
    inner: &Block,
    sorted_idxs: &[String],
    sorted_refs: &[String],
) -> String {
    let stmts = stmt_features(outer);
    let stmts: Vec<i64> = stmts.iter().map(|&s| s as i64).collect();
    format!(
        "{}{t}{}{t}{}{t}",
        join(&stmts),
        block_features(outer, sorted_idxs, sorted_refs).render(),
        block_features(inner, sorted_idxs, sorted_refs).render(),
        t = SECTION_TERMINATOR
    )
}

/// Recover the model key and feature row from a stamped block comment.
///
/// Both the per-refinement (`key... features...`) and the tiled program
/// (`stmts.outer.inner.`) layouts are recognized.
pub fn extract_features(comment: &str) -> Result<(ModelKey, Vec<f32>), FeatureError> {
    let start = comment.find(FEATURE_HEAD).ok_or_else(|| {
        FeatureError::new(FeatureErrorKind::MalformedModelKey, format!("not a feature line: '{}'", comment))
    })?;
    let body = comment[start + FEATURE_HEAD.len()..].trim();

    if body.contains(SECTION_TERMINATOR) {
        let sections: Vec<&str> = body.split(SECTION_TERMINATOR).collect();
        if sections.len() < 3 {
            return Err(FeatureError::new(
                FeatureErrorKind::MalformedModelKey,
                format!("expected stmts.outer.inner sections in '{}'", body),
            ));
        }
        let stmts = parse_numbers(sections[0])?;
        let outer = parse_rows(sections[1])?;
        let inner = parse_rows(sections[2])?;
        let columns = outer.first().map(Vec::len).unwrap_or(0);
        let mut key: Vec<u64> = stmts.iter().map(|&s| s.max(0) as u64).collect();
        key.push(outer.len() as u64);
        key.push(columns as u64);
        let values = outer
            .iter()
            .chain(&inner)
            .flatten()
            .map(|&v| v as f32)
            .collect();
        return Ok((ModelKey(key), values));
    }

    let numbers = parse_numbers(body)?;
    if numbers.len() < 2 {
        return Err(FeatureError::new(
            FeatureErrorKind::MalformedModelKey,
            format!("feature line '{}' is too short", body),
        ));
    }
    let key = ModelKey(numbers[..2].iter().map(|&n| n.max(0) as u64).collect());
    Ok((key, numbers[2..].iter().map(|&v| v as f32).collect()))
}

fn parse_numbers(s: &str) -> Result<Vec<i64>, FeatureError> {
    s.split_whitespace()
        .map(|tok| {
            tok.parse::<i64>().map_err(|_| {
                FeatureError::new(FeatureErrorKind::MalformedModelKey, format!("'{}' is not an integer", tok))
            })
        })
        .collect()
}

fn parse_rows(s: &str) -> Result<Vec<Vec<i64>>, FeatureError> {
    s.split(ROW_SEPARATOR).map(parse_numbers).collect()
}

fn join(values: &[i64]) -> String {
    values.iter().map(i64::to_string).collect::<Vec<_>>().join(" ")
}
