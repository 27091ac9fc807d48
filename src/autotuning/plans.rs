//! Tile plan enumeration and the plan file.
//!
//! A plan assigns one tile factor to every free index of the target block,
//! in declaration order. Plans are enumerated depth-first (first index
//! outermost), filtered by the memory budget, and written one per line. The
//! line number of a plan is its id for the rest of the training run.

use super::config::PlanOptions;
use crate::ir::{find_target, Block, Index};
use crate::utils::errors::{PlanFileError, TuneResult};
use crate::utils::file::{file_exists, read_file, write_file};
use log::{debug, info};
use num_integer::Integer;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Ranges up to this size only admit power-of-two factors that divide them.
///
/// Empirical threshold; tune per target.
pub const PO2_SMALL_RANGE: u64 = 5;

/// Tile factors for the free indices of a block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Plan(pub Vec<u64>);

impl Plan {
    pub fn factors(&self) -> &[u64] {
        &self.0
    }

    /// Tile shape for every index of `block`: plan factors for free indices
    /// in order, 1 for the others.
    pub fn tile_shape(&self, block: &Block) -> Vec<u64> {
        let mut factors = self.0.iter();
        block
            .idxs
            .iter()
            .map(|idx| {
                if idx.is_free() {
                    factors.next().copied().unwrap_or(idx.range)
                } else {
                    1
                }
            })
            .collect()
    }

    /// Factor per free index name of `block`.
    pub fn tile_by_name(&self, block: &Block) -> BTreeMap<String, u64> {
        block
            .tileable_idxs()
            .zip(&self.0)
            .map(|(idx, &f)| (idx.name.clone(), f))
            .collect()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        write!(f, "{}", parts.join(" "))
    }
}

impl FromStr for Plan {
    type Err = PlanFileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split_whitespace()
            .map(|tok| match tok.parse::<u64>() {
                Ok(v) if v > 0 => Ok(v),
                _ => Err(PlanFileError::Parse(s.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Plan)
    }
}

/// The plan file: one plan per line, addressed by line number.
#[derive(Debug, Clone)]
pub struct PlanFile {
    path: PathBuf,
}

impl PlanFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        file_exists(&self.path)
    }

    /// Write all plans, replacing the file.
    pub fn write(&self, plans: &[Plan]) -> Result<(), PlanFileError> {
        let mut text = String::new();
        for plan in plans {
            for factor in &plan.0 {
                text.push_str(&factor.to_string());
                text.push(' ');
            }
            text.push('\n');
        }
        write_file(&self.path, &text).map_err(|source| PlanFileError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn read_text(&self) -> Result<String, PlanFileError> {
        read_file(&self.path).map_err(|source| PlanFileError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Number of plans in the file.
    pub fn count(&self) -> Result<usize, PlanFileError> {
        Ok(self.read_text()?.lines().count())
    }

    /// Plans with line numbers in `[first, last]`.
    pub fn read_window(&self, first: usize, last: usize) -> Result<Vec<(usize, Plan)>, PlanFileError> {
        let text = self.read_text()?;
        let mut plans = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line_no > last {
                break;
            }
            if line_no < first {
                continue;
            }
            let plan = self.parse_line(line_no, line)?;
            plans.push((line_no, plan));
        }
        Ok(plans)
    }

    /// All plans in the file.
    pub fn read_all(&self) -> Result<Vec<Plan>, PlanFileError> {
        let text = self.read_text()?;
        text.lines()
            .enumerate()
            .map(|(line_no, line)| self.parse_line(line_no, line))
            .collect()
    }

    fn parse_line(&self, line_no: usize, line: &str) -> Result<Plan, PlanFileError> {
        let plan: Plan = line.parse().map_err(|_| PlanFileError::Malformed {
            path: self.path.clone(),
            line: line_no,
            reason: format!("'{}' is not a list of positive integers", line.trim()),
        })?;
        if plan.0.is_empty() {
            return Err(PlanFileError::Malformed {
                path: self.path.clone(),
                line: line_no,
                reason: "empty plan".to_string(),
            });
        }
        Ok(plan)
    }
}

/// Candidate tile factors for an index of the given range.
pub fn tile_candidates(range: u64, is_acc: bool, options: &PlanOptions) -> Vec<u64> {
    if is_acc && !options.acc_idxs {
        return vec![range];
    }
    (1..=range)
        .filter(|&f| {
            if options.only_even {
                Integer::is_multiple_of(&range, &f)
            } else if options.only_po2 {
                f == range
                    || (f.is_power_of_two()
                        && (range > PO2_SMALL_RANGE || Integer::is_multiple_of(&range, &f)))
            } else {
                true
            }
        })
        .collect()
}

/// Depth-first enumerator of valid tile plans for one block.
pub struct TilePlanGenerator<'a> {
    target: &'a Block,
    options: &'a PlanOptions,
    /// Free indices, in declaration order
    index: Vec<&'a Index>,
    acc_idxs: BTreeSet<String>,
    plan: Vec<u64>,
    plans: Vec<Plan>,
}

impl<'a> TilePlanGenerator<'a> {
    pub fn new(target: &'a Block, options: &'a PlanOptions) -> Self {
        let index: Vec<&Index> = target.tileable_idxs().collect();
        Self {
            target,
            options,
            plan: vec![0; index.len()],
            index,
            acc_idxs: target.accumulation_idxs(),
            plans: Vec::new(),
        }
    }

    /// Enumerate all valid plans.
    pub fn generate(&mut self) -> &[Plan] {
        self.plans.clear();
        self.generate_from(0);
        debug!(
            "enumerated {} valid plans over {} indices of '{}'",
            self.plans.len(),
            self.index.len(),
            self.target.name
        );
        &self.plans
    }

    fn generate_from(&mut self, k: usize) {
        if k >= self.index.len() {
            if self.is_valid_plan(&self.plan) {
                self.plans.push(Plan(self.plan.clone()));
            }
            return;
        }
        let idx = self.index[k];
        let is_acc = self.acc_idxs.contains(&idx.name);
        for factor in tile_candidates(idx.range, is_acc, self.options) {
            self.plan[k] = factor;
            self.generate_from(k + 1);
        }
    }

    /// Total byte footprint of all refinements under `plan`.
    pub fn footprint(&self, plan: &[u64]) -> u64 {
        let tile_by_name: BTreeMap<String, u64> = self
            .index
            .iter()
            .zip(plan)
            .map(|(idx, &f)| (idx.name.clone(), f))
            .collect();
        self.target
            .refs
            .iter()
            .map(|r| {
                let tiled = r.apply_tile(&tile_by_name);
                if self.options.odd_size {
                    tiled.to_odd().byte_size()
                } else {
                    tiled.byte_size()
                }
            })
            .sum()
    }

    /// Whether a complete assignment fits the memory budget.
    pub fn is_valid_plan(&self, plan: &[u64]) -> bool {
        self.footprint(plan) <= self.options.max_mem_size
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    pub fn into_plans(self) -> Vec<Plan> {
        self.plans
    }

    /// Write the enumerated plans to a plan file.
    pub fn dump(&self, path: &Path) -> Result<(), PlanFileError> {
        PlanFile::new(path).write(&self.plans)
    }
}

/// Enumerate and dump the plans of the program's target block.
///
/// Returns `None` without touching anything when the plan file already
/// exists, so resumed training directories keep their numbering.
pub fn generate_plans(program: &Block, train_dir: &Path, options: &PlanOptions) -> TuneResult<Option<usize>> {
    let plan_file = PlanFile::new(train_dir.join(&options.plan_file));
    if plan_file.exists() {
        info!("plan file {} already exists, keeping it", plan_file.path().display());
        return Ok(None);
    }
    let target = find_target(program)?;
    let mut generator = TilePlanGenerator::new(target, options);
    let count = generator.generate().len();
    generator.dump(plan_file.path())?;
    info!(
        "wrote {} tile plans for '{}' to {}",
        count,
        target.name,
        plan_file.path().display()
    );
    Ok(Some(count))
}
