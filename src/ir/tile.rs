//! Block tiling.
//!
//! Tiling splits a block into an outer block that walks over tiles and an
//! inner block that walks inside one tile:
//! ```text
//! block [i:10, j:8] { ... }
//! ```
//! with tile `[4, 8]` becomes:
//! ```text
//! block [i:3, j:1] {
//!   block [i:4, i_o = 4*i, j:8] (9 - i_o - i >= 0) { ... }
//! }
//! ```
//! Uneven tiles get a passthrough index carrying the outer position and a
//! bound constraint so the inner block never steps past the original range.

use super::affine::Affine;
use super::block::{Block, Index, Statement};
use super::refinement::Refinement;
use crate::utils::errors::{IrError, IrErrorKind};
use num_integer::Integer;
use std::collections::BTreeMap;

/// Tile factors, one per index of the block being tiled.
pub type TileShape = Vec<u64>;

/// Block tiling transformation.
#[derive(Debug, Clone)]
pub struct Tiling {
    /// Tile factor for each index (ignored for non-free indices)
    pub shape: TileShape,
    /// Interleave tiles: the outer index steps by one and the inner index by the outer range
    pub interleave: bool,
}

impl Tiling {
    pub fn new(shape: TileShape) -> Self {
        Self {
            shape,
            interleave: false,
        }
    }

    pub fn interleaved(mut self, interleave: bool) -> Self {
        self.interleave = interleave;
        self
    }

    /// Apply the tiling, turning `block` into the outer block.
    pub fn apply(&self, block: &mut Block) -> Result<(), IrError> {
        apply_tile(block, &self.shape, self.interleave)
    }
}

/// Name of the passthrough index carrying the outer position of `name`.
pub fn outer_position_name(name: &str) -> String {
    format!("{}_o", name)
}

/// Split `outer` into an outer/inner pair according to `shape`.
///
/// On return `outer` iterates over tiles and its sole statement is the inner
/// block. `shape` must have one entry per index; entries of non-free indices
/// are ignored.
pub fn apply_tile(outer: &mut Block, shape: &[u64], interleave: bool) -> Result<(), IrError> {
    if shape.len() != outer.idxs.len() {
        return Err(IrError::new(
            IrErrorKind::ShapeMismatch,
            &outer.name,
            format!("tile shape has {} entries for {} indices", shape.len(), outer.idxs.len()),
        ));
    }
    for (idx, &tile) in outer.idxs.iter().zip(shape) {
        if idx.is_free() && (tile == 0 || tile > idx.range) {
            return Err(IrError::new(
                IrErrorKind::InvalidTileSize,
                &outer.name,
                format!("tile {} is invalid for index '{}' of range {}", tile, idx.name, idx.range),
            ));
        }
    }

    let mut inner = Block::new(&outer.name);
    inner.stmts = std::mem::take(&mut outer.stmts);
    let moved_constraints = std::mem::take(&mut outer.constraints);

    let mut tile_by_name: BTreeMap<String, u64> = BTreeMap::new();
    // Coefficient of the local inner index in the original index value
    let mut inner_scale: BTreeMap<String, i64> = BTreeMap::new();
    // Coefficient of the outer index in the original index value
    let mut outer_scale: BTreeMap<String, i64> = BTreeMap::new();
    let mut values: Vec<(String, Affine)> = Vec::new();

    for (idx, &tile) in outer.idxs.iter_mut().zip(shape) {
        if !idx.is_free() {
            inner.idxs.push(Index::passthrough(&idx.name, Affine::index(&idx.name)));
            continue;
        }
        let range = idx.range;
        let outer_range = Integer::div_ceil(&range, &tile);
        let (o_coeff, i_coeff) = if interleave {
            (1, outer_range as i64)
        } else {
            (tile as i64, 1)
        };
        inner.idxs.push(Index::new(&idx.name, tile));

        let uneven = !Integer::is_multiple_of(&range, &tile);
        let constrained = moved_constraints.iter().any(|c| c.get(&idx.name) != 0);
        if uneven || constrained {
            let pass = outer_position_name(&idx.name);
            inner
                .idxs
                .push(Index::passthrough(&pass, Affine::term(&idx.name, o_coeff)));
            let value = Affine::index(&pass) + Affine::term(&idx.name, i_coeff);
            if uneven {
                inner
                    .constraints
                    .push(Affine::constant(range as i64 - 1) + value.scaled(-1));
            }
            values.push((idx.name.clone(), value));
        }

        tile_by_name.insert(idx.name.clone(), tile);
        inner_scale.insert(idx.name.clone(), i_coeff);
        outer_scale.insert(idx.name.clone(), o_coeff);
        idx.range = outer_range;
    }

    // Constraints of the original block are stated over the original index values
    for constraint in moved_constraints {
        let rewritten = values
            .iter()
            .fold(constraint, |acc, (name, value)| acc.substitute(name, value));
        inner.constraints.push(rewritten);
    }

    for r in &mut outer.refs {
        let tiled_shape = r.apply_tile(&tile_by_name);
        let inner_access: Vec<Affine> = r
            .access
            .iter()
            .map(|aff| {
                let mut local = Affine::zero();
                for (name, coeff) in aff.iter() {
                    if let Some(scale) = inner_scale.get(name) {
                        local = local + Affine::term(name, coeff * scale);
                    }
                }
                local
            })
            .collect();
        inner.refs.push(Refinement {
            dir: r.dir,
            from: r.into.clone(),
            into: r.into.clone(),
            access: inner_access,
            interior_shape: r.interior_shape.clone(),
            agg_op: r.agg_op.clone(),
        });

        for aff in &mut r.access {
            *aff = outer_scale
                .iter()
                .fold(aff.clone(), |acc, (name, &scale)| acc.substitute_scale(name, scale));
        }
        r.interior_shape = tiled_shape;
    }

    outer.stmts = vec![Statement::Block(Box::new(inner))];
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::refinement::{DataType, RefDir, TensorShape};
    use crate::ir::StmtKind;

    fn copy_block(range_i: u64, range_j: u64) -> Block {
        let mut b = Block::new("copy");
        b.idxs = vec![Index::new("i", range_i), Index::new("j", range_j)];
        b.refs = vec![
            Refinement::new(
                RefDir::In,
                "X",
                vec![Affine::index("i"), Affine::index("j")],
                TensorShape::dense(DataType::Float32, &[1, 1]),
            ),
            Refinement::new(
                RefDir::Out,
                "Y",
                vec![Affine::index("i"), Affine::index("j")],
                TensorShape::dense(DataType::Float32, &[1, 1]),
            ),
        ];
        b.stmts = vec![
            Statement::atomic(StmtKind::Load, "x"),
            Statement::atomic(StmtKind::Store, "y"),
        ];
        b
    }

    #[test]
    fn test_even_tile() {
        let mut b = copy_block(8, 6);
        b.add_tags(["kernel"]);
        apply_tile(&mut b, &[4, 3], false).unwrap();

        let ranges: Vec<u64> = b.idxs.iter().map(|i| i.range).collect();
        assert_eq!(ranges, vec![2, 2]);
        assert_eq!(b.stmts.len(), 1);
        assert!(b.has_tag("kernel"));
        assert_eq!(b.refs[0].access[0].get("i"), 4);
        assert_eq!(b.refs[0].interior_shape.sizes(), vec![4, 3]);

        let inner = b.sub_block(0).unwrap();
        let inner_ranges: Vec<u64> = inner.idxs.iter().map(|i| i.range).collect();
        assert_eq!(inner_ranges, vec![4, 3]);
        assert!(inner.constraints.is_empty());
        assert!(inner.tags.is_empty());
        assert_eq!(inner.refs[1].from, "Y");
        assert_eq!(inner.refs[1].access[0].get("i"), 1);
        assert_eq!(inner.stmts.len(), 2);
    }

    #[test]
    fn test_uneven_tile_adds_constraint() {
        let mut b = copy_block(10, 4);
        apply_tile(&mut b, &[4, 4], false).unwrap();
        assert_eq!(b.idxs[0].range, 3);

        let inner = b.sub_block(0).unwrap();
        let pass = inner.idx_by_name("i_o").unwrap();
        assert!(!pass.is_free());
        assert_eq!(pass.affine.get("i"), 4);
        assert_eq!(inner.constraints.len(), 1);
        // 9 - i_o - i >= 0
        let c = &inner.constraints[0];
        assert_eq!(c.constant, 9);
        assert_eq!(c.get("i_o"), -1);
        assert_eq!(c.get("i"), -1);
    }

    #[test]
    fn test_interleave_scales_inner() {
        let mut b = copy_block(8, 2);
        Tiling::new(vec![2, 2]).interleaved(true).apply(&mut b).unwrap();
        assert_eq!(b.idxs[0].range, 4);
        assert_eq!(b.refs[0].access[0].get("i"), 1);
        let inner = b.sub_block(0).unwrap();
        assert_eq!(inner.refs[0].access[0].get("i"), 4);
    }

    #[test]
    fn test_existing_constraints_are_rewritten() {
        let mut b = copy_block(8, 8);
        // i - j >= 0
        b.constraints.push(Affine::index("i") + Affine::term("j", -1));
        apply_tile(&mut b, &[2, 8], false).unwrap();
        let inner = b.sub_block(0).unwrap();
        assert_eq!(inner.constraints.len(), 1);
        let c = &inner.constraints[0];
        assert_eq!(c.get("i_o"), 1);
        assert_eq!(c.get("i"), 1);
        assert_eq!(c.get("j_o"), -1);
        assert_eq!(c.get("j"), -1);
    }

    #[test]
    fn test_invalid_tiles() {
        let mut b = copy_block(4, 4);
        let err = apply_tile(&mut b, &[4], false).unwrap_err();
        assert_eq!(err.kind, IrErrorKind::ShapeMismatch);
        let err = apply_tile(&mut b, &[5, 1], false).unwrap_err();
        assert_eq!(err.kind, IrErrorKind::InvalidTileSize);
        let err = apply_tile(&mut b, &[0, 1], false).unwrap_err();
        assert_eq!(err.kind, IrErrorKind::InvalidTileSize);
        // A failed tiling leaves the block untouched
        assert_eq!(b, copy_block(4, 4));
    }

    #[test]
    fn test_passthrough_index_is_not_tiled() {
        let mut b = copy_block(4, 4);
        b.idxs.push(Index::passthrough("n", Affine::index("n")));
        apply_tile(&mut b, &[2, 2, 99], false).unwrap();
        assert_eq!(b.idxs[2].range, 1);
        let inner = b.sub_block(0).unwrap();
        assert!(!inner.idx_by_name("n").unwrap().is_free());
    }
}
