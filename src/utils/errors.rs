//! Error types for the autotuner.
//!
//! This module defines all error types used throughout the crate,
//! organized by the component that produces them.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the autotuner.
#[derive(Error, Debug)]
pub enum TileTuneError {
    /// Error in the block IR (tiling, lookups)
    #[error("IR error: {0}")]
    Ir(#[from] IrError),

    /// Error during feature extraction
    #[error("Feature extraction error: {0}")]
    Feature(#[from] FeatureError),

    /// Error reading or writing the plan file
    #[error("Plan file error: {0}")]
    PlanFile(#[from] PlanFileError),

    /// Error in the persisted training status
    #[error("Train status error: {0}")]
    Status(#[from] StatusError),

    /// Error loading or querying the cost model
    #[error("Cost model error: {0}")]
    CostModel(#[from] CostModelError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised by the block IR.
#[derive(Error, Debug, Clone)]
pub struct IrError {
    /// The error message
    pub message: String,
    /// The kind of IR error
    pub kind: IrErrorKind,
    /// Name of the block involved
    pub block: String,
}

impl IrError {
    /// Create a new IR error for the named block.
    pub fn new(kind: IrErrorKind, block: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            block: block.into(),
        }
    }
}

impl fmt::Display for IrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in block '{}'", self.message, self.block)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrErrorKind {
    /// Tile shape does not have one entry per index
    ShapeMismatch,
    /// Tile factor is zero or exceeds the index range
    InvalidTileSize,
    /// No eligible target block inside the program
    NoTarget,
    /// A sub-block that was expected is missing
    MissingSubBlock,
}

/// Error during feature extraction.
#[derive(Error, Debug, Clone)]
pub struct FeatureError {
    /// The error message
    pub message: String,
    /// The kind of feature error
    pub kind: FeatureErrorKind,
}

impl FeatureError {
    pub fn new(kind: FeatureErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl fmt::Display for FeatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureErrorKind {
    /// No refinement with non-zero access
    NoTargetRefinement,
    /// More than one refinement with non-zero access
    AmbiguousTargetRefinement,
    /// A model key string could not be parsed
    MalformedModelKey,
}

/// Error reading or writing a plan file.
#[derive(Error, Debug)]
pub enum PlanFileError {
    /// A line of the plan file is not a list of positive integers
    #[error("malformed plan at {path}:{line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A plan string could not be parsed
    #[error("malformed plan '{0}'")]
    Parse(String),

    /// The plan file could not be read or written
    #[error("cannot access plan file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Error in the persisted training status.
#[derive(Error, Debug)]
pub enum StatusError {
    /// A required status file does not exist
    #[error("status file {0} does not exist")]
    Missing(PathBuf),

    /// A status file does not hold an integer
    #[error("cannot parse {path}: '{content}' is not an integer")]
    Parse { path: PathBuf, content: String },

    /// A monotonic counter would move backwards
    #[error("refusing to move {path} back from {current} to {requested}")]
    Regression {
        path: PathBuf,
        current: i64,
        requested: i64,
    },

    /// A status file could not be read or written
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Error loading or querying the cost model.
#[derive(Error, Debug)]
pub enum CostModelError {
    /// The model catalogue could not be opened
    #[error("unable to open model catalogue {path}: {source}")]
    Catalogue {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The model catalogue is malformed
    #[error("malformed model catalogue {path}:{line}: {reason}")]
    MalformedCatalogue {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A model file could not be read or parsed
    #[error("unable to load model {path}: {reason}")]
    Model { path: PathBuf, reason: String },

    /// The feature matrix does not match the declared dimensions
    #[error("feature matrix has {len} values, expected {rows} x {columns}")]
    FeatureShape {
        len: usize,
        rows: usize,
        columns: usize,
    },

    /// The feature matrix has fewer columns than the model splits on
    #[error("model needs {needed} feature columns, got {columns}")]
    TooFewColumns { needed: usize, columns: usize },
}

/// Result type using TileTuneError.
pub type TuneResult<T> = Result<T, TileTuneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IrError::new(IrErrorKind::InvalidTileSize, "conv", "tile 9 exceeds range 8 of 'i'");
        let s = format!("{}", err);
        assert!(s.contains("tile 9"));
        assert!(s.contains("conv"));

        let top: TileTuneError = err.into();
        assert!(top.to_string().starts_with("IR error"));
    }

    #[test]
    fn test_plan_error_names_file() {
        let err = PlanFileError::Malformed {
            path: PathBuf::from("/tmp/train/plans"),
            line: 3,
            reason: "'x' is not a positive integer".to_string(),
        };
        assert!(err.to_string().contains("/tmp/train/plans:3"));
    }
}
