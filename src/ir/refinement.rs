//! Refinements: named memory accesses of a block.

use super::affine::Affine;
use super::block::Index;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Direction of a refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefDir {
    #[default]
    None,
    In,
    Out,
    InOut,
}

impl RefDir {
    /// Stable integer code used in model keys.
    pub fn code(self) -> u64 {
        match self {
            RefDir::None => 0,
            RefDir::In => 1,
            RefDir::Out => 2,
            RefDir::InOut => 3,
        }
    }

    /// Whether the refinement is written.
    pub fn is_output(self) -> bool {
        matches!(self, RefDir::Out | RefDir::InOut)
    }
}

impl fmt::Display for RefDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefDir::None => write!(f, "none"),
            RefDir::In => write!(f, "in"),
            RefDir::Out => write!(f, "out"),
            RefDir::InOut => write!(f, "inout"),
        }
    }
}

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float16,
    #[default]
    Float32,
    Float64,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn byte_width(self) -> u64 {
        match self {
            DataType::Bool | DataType::Int8 | DataType::Uint8 => 1,
            DataType::Int16 | DataType::Uint16 | DataType::Float16 => 2,
            DataType::Int32 | DataType::Uint32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Uint64 | DataType::Float64 => 8,
        }
    }
}

/// One dimension of a tensor shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorDimension {
    /// Stride in elements
    pub stride: i64,
    /// Number of elements
    pub size: u64,
}

impl TensorDimension {
    pub fn new(stride: i64, size: u64) -> Self {
        Self { stride, size }
    }
}

/// Shape of a tensor view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TensorShape {
    #[serde(default)]
    pub dtype: DataType,
    #[serde(default)]
    pub dims: Vec<TensorDimension>,
}

impl TensorShape {
    pub fn new(dtype: DataType, dims: Vec<TensorDimension>) -> Self {
        Self { dtype, dims }
    }

    /// Dense row-major shape from sizes.
    pub fn dense(dtype: DataType, sizes: &[u64]) -> Self {
        let mut dims = Vec::with_capacity(sizes.len());
        let mut stride = 1i64;
        for &size in sizes.iter().rev() {
            dims.push(TensorDimension::new(stride, size));
            stride *= size as i64;
        }
        dims.reverse();
        Self { dtype, dims }
    }

    /// Number of elements.
    pub fn elem_count(&self) -> u64 {
        self.dims.iter().map(|d| d.size).product()
    }

    /// Dense footprint in bytes.
    pub fn byte_size(&self) -> u64 {
        self.elem_count() * self.dtype.byte_width()
    }

    /// Round every even dimension size up to the next odd size.
    pub fn to_odd(&self) -> Self {
        let mut odd = self.clone();
        for dim in &mut odd.dims {
            if dim.size % 2 == 0 {
                dim.size += 1;
            }
        }
        odd
    }

    pub fn sizes(&self) -> Vec<u64> {
        self.dims.iter().map(|d| d.size).collect()
    }
}

/// Inclusive range of values an access dimension takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub min: i64,
    pub max: i64,
}

impl Extent {
    /// Number of distinct positions covered.
    pub fn width(&self) -> i64 {
        self.max - self.min + 1
    }
}

/// A named memory access within a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refinement {
    #[serde(default)]
    pub dir: RefDir,
    /// Name of the refinement in the parent block
    #[serde(default)]
    pub from: String,
    /// Name of the refinement in this block
    pub into: String,
    /// One affine per tensor dimension
    #[serde(default)]
    pub access: Vec<Affine>,
    #[serde(default)]
    pub interior_shape: TensorShape,
    /// Aggregation op for outputs, e.g. "add"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg_op: Option<String>,
}

impl Refinement {
    pub fn new(dir: RefDir, into: &str, access: Vec<Affine>, interior_shape: TensorShape) -> Self {
        Self {
            dir,
            from: into.to_string(),
            into: into.to_string(),
            access,
            interior_shape,
            agg_op: None,
        }
    }

    pub fn with_agg_op(mut self, agg_op: &str) -> Self {
        self.agg_op = Some(agg_op.to_string());
        self
    }

    /// Rank of the access.
    pub fn rank(&self) -> usize {
        self.access.len()
    }

    pub fn is_output(&self) -> bool {
        self.dir.is_output()
    }

    /// True when every access dimension is zero (an inert placeholder).
    pub fn is_zero_access(&self) -> bool {
        self.access.iter().all(Affine::is_zero)
    }

    /// True when some access dimension depends on an index. Tiling keeps
    /// only index terms in the inner access, so these are the refinements
    /// still addressed inside a tile.
    pub fn is_indexed(&self) -> bool {
        self.access.iter().any(|aff| !aff.is_constant())
    }

    /// Replace every access dimension by zero.
    pub fn zero_access(&mut self) {
        for acc in &mut self.access {
            *acc = Affine::zero();
        }
    }

    /// Access flattened through the interior strides.
    pub fn flat_access(&self) -> Affine {
        self.access
            .iter()
            .zip(&self.interior_shape.dims)
            .fold(Affine::zero(), |acc, (aff, dim)| acc + aff.scaled(dim.stride))
    }

    /// Per access dimension, the range of values taken over `idxs`.
    pub fn extents(&self, idxs: &[Index]) -> Vec<Extent> {
        let ranges: BTreeMap<&str, u64> = idxs.iter().map(|i| (i.name.as_str(), i.range)).collect();
        self.access
            .iter()
            .map(|aff| {
                let mut ext = Extent {
                    min: aff.constant,
                    max: aff.constant,
                };
                for (name, coeff) in aff.iter() {
                    let range = ranges.get(name).copied().unwrap_or(1);
                    let span = coeff * (range.saturating_sub(1) as i64);
                    if span > 0 {
                        ext.max += span;
                    } else {
                        ext.min += span;
                    }
                }
                ext
            })
            .collect()
    }

    /// Shape of the region touched when every index `name` runs over `[0, tile[name])`.
    ///
    /// Indices missing from `tile_by_name` are treated as a tile of 1.
    pub fn apply_tile(&self, tile_by_name: &BTreeMap<String, u64>) -> TensorShape {
        let mut shape = self.interior_shape.clone();
        for (aff, dim) in self.access.iter().zip(shape.dims.iter_mut()) {
            let mut pos = 0i64;
            let mut neg = 0i64;
            for (name, coeff) in aff.iter() {
                let tile = tile_by_name.get(name).copied().unwrap_or(1);
                let span = coeff * (tile.saturating_sub(1) as i64);
                if span > 0 {
                    pos += span;
                } else {
                    neg += span;
                }
            }
            let interior = dim.size.max(1) as i64 - 1;
            dim.size = (interior + pos - neg + 1) as u64;
        }
        shape
    }
}
