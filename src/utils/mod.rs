//! Utility modules for the autotuner.
//!
//! - Error types
//! - Small text-file helpers shared by the persisted training state

pub mod errors;
pub mod file;

// Re-exports
pub use errors::*;
