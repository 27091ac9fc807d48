//! Blocks, indices and statements of the tiling IR.

use super::affine::Affine;
use super::refinement::Refinement;
use crate::utils::errors::{IrError, IrErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Name of the root block of a program.
pub const MAIN_BLOCK: &str = "main";

/// Tag marking blocks that only zero-initialize a buffer.
pub const ZERO_TAG: &str = "zero";

/// Tag marking element-wise padding blocks.
pub const PADDING_TAG: &str = "eltwise_padding";

/// A named loop dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub range: u64,
    /// Non-empty when the index is derived from indices of an enclosing block
    #[serde(default, skip_serializing_if = "Affine::is_zero")]
    pub affine: Affine,
}

impl Index {
    /// A free index with the given range.
    pub fn new(name: &str, range: u64) -> Self {
        Self {
            name: name.to_string(),
            range,
            affine: Affine::zero(),
        }
    }

    /// A range-1 index whose value is passed in from the enclosing block.
    pub fn passthrough(name: &str, affine: Affine) -> Self {
        Self {
            name: name.to_string(),
            range: 1,
            affine,
        }
    }

    /// Only free indices are tiling candidates.
    pub fn is_free(&self) -> bool {
        self.affine.is_zero()
    }
}

/// Kind of an atomic statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StmtKind {
    Load,
    Store,
    LoadIndex,
    Constant,
    Special,
    Intrinsic,
}

impl StmtKind {
    /// All kinds, in the order used by statement features.
    pub const ALL: [StmtKind; 6] = [
        StmtKind::Load,
        StmtKind::Store,
        StmtKind::LoadIndex,
        StmtKind::Constant,
        StmtKind::Special,
        StmtKind::Intrinsic,
    ];
}

/// A statement of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Statement {
    /// A nested block
    Block(Box<Block>),
    /// Any non-block statement
    Atomic { kind: StmtKind, name: String },
}

impl Statement {
    pub fn atomic(kind: StmtKind, name: &str) -> Self {
        Statement::Atomic {
            kind,
            name: name.to_string(),
        }
    }

    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Statement::Block(b) => Some(b),
            Statement::Atomic { .. } => None,
        }
    }

    pub fn as_block_mut(&mut self) -> Option<&mut Block> {
        match self {
            Statement::Block(b) => Some(b),
            Statement::Atomic { .. } => None,
        }
    }
}

impl From<Block> for Statement {
    fn from(block: Block) -> Self {
        Statement::Block(Box::new(block))
    }
}

/// A loop nest with its memory refinements and nested statements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    /// Free-form side channel; the tile generator stores features here
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comments: String,
    #[serde(default)]
    pub idxs: Vec<Index>,
    /// Each constraint requires `affine >= 0`
    #[serde(default)]
    pub constraints: Vec<Affine>,
    #[serde(default)]
    pub refs: Vec<Refinement>,
    #[serde(default)]
    pub stmts: Vec<Statement>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Block {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn add_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
    }

    pub fn idx_by_name(&self, name: &str) -> Option<&Index> {
        self.idxs.iter().find(|i| i.name == name)
    }

    pub fn ref_by_into(&self, into: &str) -> Option<&Refinement> {
        self.refs.iter().find(|r| r.into == into)
    }

    /// The `n`-th nested block.
    pub fn sub_block(&self, n: usize) -> Option<&Block> {
        self.stmts.iter().filter_map(Statement::as_block).nth(n)
    }

    pub fn sub_block_mut(&mut self, n: usize) -> Option<&mut Block> {
        self.stmts.iter_mut().filter_map(Statement::as_block_mut).nth(n)
    }

    /// Like `sub_block_mut`, but a missing sub-block is an error.
    pub fn expect_sub_block_mut(&mut self, n: usize) -> Result<&mut Block, IrError> {
        let name = self.name.clone();
        self.sub_block_mut(n).ok_or_else(|| {
            IrError::new(IrErrorKind::MissingSubBlock, name, format!("no sub-block #{}", n))
        })
    }

    /// Free indices, in declaration order.
    pub fn tileable_idxs(&self) -> impl Iterator<Item = &Index> {
        self.idxs.iter().filter(|i| i.is_free())
    }

    /// Free indices that no output refinement accesses.
    pub fn accumulation_idxs(&self) -> BTreeSet<String> {
        self.tileable_idxs()
            .filter(|idx| {
                !self
                    .refs
                    .iter()
                    .filter(|r| r.is_output())
                    .any(|r| r.access.iter().any(|a| a.get(&idx.name) != 0))
            })
            .map(|idx| idx.name.clone())
            .collect()
    }

    /// Blocks that only zero a buffer, or that touch no memory at all.
    pub fn is_zero_block(&self) -> bool {
        self.has_tag(ZERO_TAG) || self.refs.iter().all(Refinement::is_zero_access)
    }

    /// Number of atomic statements of each kind, in `StmtKind::ALL` order.
    pub fn stmt_kind_counts(&self) -> Vec<u64> {
        let mut counts: BTreeMap<StmtKind, u64> = BTreeMap::new();
        for stmt in &self.stmts {
            if let Statement::Atomic { kind, .. } = stmt {
                *counts.entry(*kind).or_insert(0) += 1;
            }
        }
        StmtKind::ALL.iter().map(|k| counts.get(k).copied().unwrap_or(0)).collect()
    }

    /// Product of all index ranges.
    pub fn iterations(&self) -> u64 {
        self.idxs.iter().map(|i| i.range).product()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {}", self.name)?;
        if !self.tags.is_empty() {
            let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            write!(f, " <{}>", tags.join(", "))?;
        }
        let idxs: Vec<String> = self.idxs.iter().map(|i| format!("{}:{}", i.name, i.range)).collect();
        write!(f, " [{}]", idxs.join(", "))
    }
}

/// Position in `program.stmts` of the block the autotuner works on.
///
/// The program must be the `main` block; the target is its first child block
/// that is neither a zero block nor tagged as padding.
pub fn find_target_position(program: &Block) -> Result<usize, IrError> {
    if program.name != MAIN_BLOCK {
        return Err(IrError::new(
            IrErrorKind::NoTarget,
            &program.name,
            format!("program root must be named '{}'", MAIN_BLOCK),
        ));
    }
    program
        .stmts
        .iter()
        .position(|stmt| match stmt.as_block() {
            Some(sub) => !sub.is_zero_block() && !sub.has_tag(PADDING_TAG),
            None => false,
        })
        .ok_or_else(|| IrError::new(IrErrorKind::NoTarget, &program.name, "nothing to test"))
}

/// The block the autotuner works on.
pub fn find_target(program: &Block) -> Result<&Block, IrError> {
    let pos = find_target_position(program)?;
    program.stmts[pos].as_block().ok_or_else(|| {
        IrError::new(IrErrorKind::NoTarget, &program.name, "target is not a block")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::refinement::{DataType, RefDir, TensorShape};

    fn scalar_ref(dir: RefDir, name: &str, access: Vec<Affine>) -> Refinement {
        let shape = TensorShape::dense(DataType::Float32, &vec![1; access.len()]);
        Refinement::new(dir, name, access, shape)
    }

    fn matmul() -> Block {
        let mut b = Block::new("matmul");
        b.idxs = vec![Index::new("i", 8), Index::new("j", 8), Index::new("k", 16)];
        b.refs = vec![
            scalar_ref(RefDir::In, "A", vec![Affine::index("i"), Affine::index("k")]),
            scalar_ref(RefDir::In, "B", vec![Affine::index("k"), Affine::index("j")]),
            scalar_ref(RefDir::Out, "C", vec![Affine::index("i"), Affine::index("j")]).with_agg_op("add"),
        ];
        b.stmts = vec![
            Statement::atomic(StmtKind::Load, "a"),
            Statement::atomic(StmtKind::Load, "b"),
            Statement::atomic(StmtKind::Intrinsic, "mul"),
            Statement::atomic(StmtKind::Store, "c"),
        ];
        b
    }

    #[test]
    fn test_accumulation_idxs() {
        let b = matmul();
        let acc: Vec<String> = b.accumulation_idxs().into_iter().collect();
        assert_eq!(acc, vec!["k".to_string()]);
    }

    #[test]
    fn test_stmt_kind_counts() {
        assert_eq!(matmul().stmt_kind_counts(), vec![2, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_find_target_skips_zero_and_padding() {
        let mut zero = Block::new("zero_c");
        zero.add_tags([ZERO_TAG]);
        let mut pad = matmul();
        pad.name = "pad".to_string();
        pad.add_tags([PADDING_TAG]);

        let mut main = Block::new(MAIN_BLOCK);
        main.stmts = vec![
            Statement::atomic(StmtKind::Special, "init"),
            zero.into(),
            pad.into(),
            matmul().into(),
        ];
        assert_eq!(find_target_position(&main).unwrap(), 3);
        assert_eq!(find_target(&main).unwrap().name, "matmul");
    }

    #[test]
    fn test_find_target_none() {
        let main = Block::new(MAIN_BLOCK);
        let err = find_target(&main).unwrap_err();
        assert_eq!(err.kind, IrErrorKind::NoTarget);

        let other = Block::new("kernel");
        assert!(find_target(&other).is_err());
    }

    #[test]
    fn test_clone_is_deep() {
        let original = matmul();
        let mut copy = original.clone();
        copy.idxs[0].range = 1;
        copy.refs[0].zero_access();
        assert_eq!(original.idxs[0].range, 8);
        assert!(!original.refs[0].is_zero_access());
    }

    #[test]
    fn test_json_round_trip() {
        let mut main = Block::new(MAIN_BLOCK);
        main.stmts.push(matmul().into());
        let text = serde_json::to_string(&main).unwrap();
        let back: Block = serde_json::from_str(&text).unwrap();
        assert_eq!(back, main);
    }
}
