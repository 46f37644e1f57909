//! Error types for reliability runs
//!
//! Only configuration problems, generator misuse and wholesale model failures
//! stop a run. Undefined limit-state values are carried as `f64::NAN` and
//! handled by the algorithms themselves.

use thiserror::Error;

use crate::reliability::ValidationReport;
use crate::statistics::GeneratorKind;

/// Errors raised when initializing a random generator
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeneratorError {
    #[error("seed {seed} is out of range for {generator:?} generator, allowed: [{min}, {max})")]
    SeedOutOfRange {
        generator: GeneratorKind,
        seed: i64,
        min: i64,
        max: i64,
    },
}

/// Errors raised by the model-evaluation capability
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("model evaluation failed: {message}")]
    Failed { message: String },

    #[error("model returned {actual} values for a batch of {expected} samples")]
    BatchSizeMismatch { expected: usize, actual: usize },
}

/// Errors that abort a reliability run
#[derive(Debug, Error)]
pub enum ReliabilityError {
    #[error("invalid settings:\n{0}")]
    InvalidSettings(ValidationReport),

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("could not build worker pool: {0}")]
    ThreadPool(String),
}

pub type Result<T> = std::result::Result<T, ReliabilityError>;

/// Errors raised while loading a project file
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("cannot read project file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse project file: {0}")]
    Json(#[from] serde_json::Error),
}
