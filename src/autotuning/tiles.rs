//! Materialization of tile plans into blocks.
//!
//! Each autotuning iteration picks the next window of plan-file lines from
//! the training status, tiles a clone of the target block once per plan (or
//! once per plan and refinement), stamps the features of the innermost tile
//! into the block comment and splices the results into the program in place
//! of the target.

use super::config::{TileOptions, TileStrategy};
use super::plans::{Plan, PlanFile};
use super::status::TrainStatus;
use crate::analysis::{
    ordered_index, ordered_refinements, tiled_block_features_str, tiled_program_features_str,
    FEATURE_HEAD,
};
use crate::ir::{apply_tile, find_target_position, Block, Refinement, Statement};
use crate::utils::errors::{IrError, IrErrorKind, TuneResult};
use log::{debug, info};
use std::collections::BTreeSet;
use std::path::Path;

/// Tag prefix recording the tile id of a generated block.
pub const TILE_TAG_PREFIX: &str = "tile_";

/// Tile ids selected for one iteration, before failed starts are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    pub first_tile: i64,
    pub last_tile: i64,
    /// Plan id to record as failed
    pub failed_plan: Option<i64>,
    /// New value of the last tested tile
    pub last_tested: Option<i64>,
}

/// Choose the next window of tile ids from the training progress.
///
/// If the previous window fully succeeded the next one starts right after
/// it. Otherwise the plan of the first unbuilt tile failed: the tiles before
/// it are retried, or the window moves past it when nothing came before.
pub fn plan_window(last_tested: i64, last_built: i64, window_plans: usize, blocks_per_plan: usize) -> WindowPlan {
    let bpp = blocks_per_plan.max(1) as i64;
    let window = window_plans.max(1) as i64 * bpp;
    if last_tested == last_built {
        return WindowPlan {
            first_tile: last_tested + 1,
            last_tile: last_tested + window,
            failed_plan: None,
            last_tested: None,
        };
    }
    let failed_plan = Some((last_built + 1).div_euclid(bpp));
    if last_built >= last_tested + bpp {
        WindowPlan {
            first_tile: last_tested + 1,
            last_tile: (last_built + 1).div_euclid(bpp) * bpp - 1,
            failed_plan,
            last_tested: None,
        }
    } else {
        let first_tile = last_tested + bpp + 1;
        WindowPlan {
            first_tile,
            last_tile: first_tile + window - 1,
            failed_plan,
            last_tested: Some(last_tested + bpp),
        }
    }
}

/// Blocks generated for one window.
#[derive(Debug, Clone)]
pub struct TileWindow {
    pub first_tile: i64,
    pub last_tile: i64,
    pub first_plan: usize,
    pub last_plan: usize,
    pub blocks: Vec<Block>,
}

impl TileWindow {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Clones and tiles the target block for every plan of a window.
pub struct BlockGenerator<'a> {
    target: &'a Block,
    options: &'a TileOptions,
    acc_idxs: BTreeSet<String>,
    sorted_idxs: Vec<String>,
    sorted_refs: Vec<String>,
}

impl<'a> BlockGenerator<'a> {
    pub fn new(target: &'a Block, options: &'a TileOptions) -> Self {
        Self {
            target,
            options,
            acc_idxs: target.accumulation_idxs(),
            sorted_idxs: ordered_index(target),
            sorted_refs: ordered_refinements(target),
        }
    }

    /// Refinements that get a block of their own.
    fn live_refs(&self) -> impl Iterator<Item = &'a Refinement> {
        self.target.refs.iter().filter(|r| r.is_indexed())
    }

    /// Number of blocks generated from one plan.
    pub fn blocks_per_plan(&self) -> usize {
        match self.options.strategy {
            TileStrategy::PerRefinement => self.live_refs().count().max(1),
            TileStrategy::WholeBlock => 1,
        }
    }

    /// Select the next window, update `status` and materialize it.
    ///
    /// Returns `None` when nothing is left to generate.
    pub fn generate_all_blocks(&self, status: &mut TrainStatus, plan_file: &PlanFile) -> TuneResult<Option<TileWindow>> {
        let bpp = self.blocks_per_plan();
        let (window, first_tile) = loop {
            let last_tested = status.last_tested_tile()?;
            let last_built = status.last_built_tile()?;
            let window = plan_window(last_tested, last_built, self.options.window_plans(bpp), bpp);
            debug!(
                "last tested {}, last built {}: window [{}, {}]",
                last_tested, last_built, window.first_tile, window.last_tile
            );

            if let Some(plan) = window.failed_plan {
                status.add_failed_tile(plan)?;
            }
            if let Some(tested) = window.last_tested {
                status.set_last_tested_tile(tested)?;
            }

            let step = bpp as i64;
            let mut first_tile = window.first_tile;
            while status.is_failed_tile(first_tile / step)? {
                first_tile += step;
            }
            if first_tile <= window.last_tile {
                break (window, first_tile);
            }
            // Only failed plans are left in the window
            status.skip_tiles(window.last_tile)?;
        };

        let bpp = bpp as i64;
        let first_plan = (first_tile / bpp) as usize;
        let last_plan = (window.last_tile / bpp) as usize;
        let plans = plan_file.read_window(first_plan, last_plan)?;
        if plans.is_empty() {
            info!(
                "plan file {} has no plans from line {}",
                plan_file.path().display(),
                first_plan
            );
            return Ok(None);
        }

        let mut blocks = Vec::new();
        for (line, plan) in &plans {
            self.generate_plan_blocks(*line, plan, &mut blocks)?;
        }
        status.set_first_generated_tile(first_tile)?;

        let last_plan = plans.last().map(|(line, _)| *line).unwrap_or(first_plan);
        info!(
            "generated {} blocks for plans {}..={} of '{}'",
            blocks.len(),
            first_plan,
            last_plan,
            self.target.name
        );
        Ok(Some(TileWindow {
            first_tile,
            last_tile: window.last_tile,
            first_plan,
            last_plan,
            blocks,
        }))
    }

    /// Materialize one plan, appending the blocks to `out`.
    pub fn generate_plan_blocks(&self, line: usize, plan: &Plan, out: &mut Vec<Block>) -> TuneResult<()> {
        let expected = self.target.tileable_idxs().count();
        if plan.factors().len() != expected {
            return Err(IrError::new(
                IrErrorKind::ShapeMismatch,
                &self.target.name,
                format!(
                    "plan {} has {} factors for {} tileable indices",
                    line,
                    plan.factors().len(),
                    expected
                ),
            )
            .into());
        }
        match self.options.strategy {
            TileStrategy::PerRefinement => {
                let bpp = self.blocks_per_plan();
                for (n, r) in self.live_refs().enumerate() {
                    let tile_id = line * bpp + n;
                    out.push(self.refinement_block(tile_id, plan, r)?);
                }
            }
            TileStrategy::WholeBlock => out.push(self.whole_block(line, plan)?),
        }
        Ok(())
    }

    /// Tile `block` by `plan`, then split the accumulation indices into a
    /// middle level. Returns `(workgroups, iterations)`.
    fn tile_levels(&self, block: &mut Block, plan: &Plan) -> TuneResult<(u64, u64)> {
        apply_tile(block, &plan.tile_shape(self.target), self.options.interleave)?;
        block.add_tags(self.options.outer_set.iter().cloned());

        let outer_plan: Vec<u64> = block
            .idxs
            .iter()
            .map(|idx| if self.acc_idxs.contains(&idx.name) { idx.range } else { 1 })
            .collect();
        apply_tile(block, &outer_plan, false)?;
        let workgroups = block.iterations();

        let middle = block.expect_sub_block_mut(0)?;
        middle.add_tags(self.options.middle_set.iter().cloned());
        let iterations = middle.iterations();
        Ok((workgroups, iterations))
    }

    fn refinement_block(&self, tile_id: usize, plan: &Plan, target_ref: &Refinement) -> TuneResult<Block> {
        let mut block = self.target.clone();
        for other in block.refs.iter_mut().filter(|r| r.into != target_ref.into) {
            other.zero_access();
        }
        let (workgroups, iterations) = self.tile_levels(&mut block, plan)?;

        let used: BTreeSet<String> = target_ref.flat_access().iter().map(|(name, _)| name.to_string()).collect();
        let inner = block.expect_sub_block_mut(0)?.expect_sub_block_mut(0)?;
        for idx in inner.idxs.iter_mut().filter(|idx| !used.contains(&idx.name)) {
            idx.range = 1;
        }
        inner.add_tags(self.options.inner_set.iter().cloned());
        let features = tiled_block_features_str(inner)?;

        block.comments = format!("{} {} {}{}", workgroups, iterations, FEATURE_HEAD, features);
        block.add_tags([format!("{}{}", TILE_TAG_PREFIX, tile_id)]);
        Ok(block)
    }

    fn whole_block(&self, line: usize, plan: &Plan) -> TuneResult<Block> {
        let mut block = self.target.clone();
        let (workgroups, iterations) = self.tile_levels(&mut block, plan)?;

        let used: BTreeSet<String> = self
            .target
            .refs
            .iter()
            .flat_map(|r| r.flat_access().iter().map(|(name, _)| name.to_string()).collect::<Vec<_>>())
            .collect();
        let inner = block.expect_sub_block_mut(0)?.expect_sub_block_mut(0)?;
        for idx in inner.idxs.iter_mut().filter(|idx| !used.contains(&idx.name)) {
            idx.range = 1;
        }
        inner.add_tags(self.options.inner_set.iter().cloned());
        let inner = inner.clone();

        let features = tiled_program_features_str(&block, &inner, &self.sorted_idxs, &self.sorted_refs);
        block.comments = format!("{} {} {}{}", workgroups, iterations, FEATURE_HEAD, features);
        block.add_tags([format!("{}{}", TILE_TAG_PREFIX, line)]);
        Ok(block)
    }
}

/// Generate the next window of tiled blocks for `program` and splice them
/// in place of its target block.
///
/// Returns `None`, leaving the program untouched, when no window is left.
pub fn generate_tiles(program: &mut Block, train_dir: &Path, options: &TileOptions) -> TuneResult<Option<TileWindow>> {
    let pos = find_target_position(program)?;
    let target = match program.stmts[pos].as_block() {
        Some(target) => target,
        None => {
            return Err(IrError::new(IrErrorKind::NoTarget, &program.name, "target is not a block").into())
        }
    };

    let plan_file = PlanFile::new(train_dir.join(&options.plan_file));
    let mut status = TrainStatus::new(train_dir);
    let generator = BlockGenerator::new(target, options);
    let Some(window) = generator.generate_all_blocks(&mut status, &plan_file)? else {
        return Ok(None);
    };

    let generated: Vec<Statement> = window.blocks.iter().cloned().map(Statement::from).collect();
    program.stmts.splice(pos..=pos, generated);
    Ok(Some(window))
}
