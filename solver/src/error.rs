//! Error types for grid construction, transition-map building and persistence.
//!
//! Only configuration problems and I/O are errors. An oracle reporting a
//! failed transition is data (recorded in `Q_F`), and an empty viability
//! kernel is a valid result.

use thiserror::Error;

/// Result type for viability operations.
pub type Result<T> = std::result::Result<T, ViabilityError>;

/// Errors that can occur while building or solving a viability problem.
#[derive(Error, Debug)]
pub enum ViabilityError {
    /// A grid must have at least one dimension.
    #[error("Grid must have at least one dimension")]
    EmptyGrid,

    /// Every grid axis needs at least one coordinate.
    #[error("Grid axis {dim} has no coordinates")]
    EmptyAxis { dim: usize },

    /// Grid coordinates must be finite.
    #[error("Grid axis {dim} has non-finite coordinate {value} at position {index}")]
    NonFiniteCoordinate { dim: usize, index: usize, value: f64 },

    /// Grid coordinates must be strictly increasing.
    #[error("Grid axis {dim} is not strictly increasing at position {index} ({prev} >= {value})")]
    NonMonotonicAxis {
        dim: usize,
        index: usize,
        prev: f64,
        value: f64,
    },

    /// Point or index length does not match the grid dimensionality.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Array shape does not match the grid configuration.
    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// The oracle raised an error (not a reported failure) for a grid point.
    #[error("Oracle error at grid point {point}: {message}")]
    Oracle { point: usize, message: String },

    /// The worker pool could not be created.
    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// Artifact file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Artifact (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Artifact was written by an incompatible format version.
    #[error("Unsupported artifact format version {found} (expected {expected})")]
    FormatVersion { expected: u32, found: u32 },
}

impl ViabilityError {
    /// True for errors caused by a malformed grid or array configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ViabilityError::EmptyGrid
                | ViabilityError::EmptyAxis { .. }
                | ViabilityError::NonFiniteCoordinate { .. }
                | ViabilityError::NonMonotonicAxis { .. }
                | ViabilityError::DimensionMismatch { .. }
                | ViabilityError::ShapeMismatch { .. }
        )
    }
}
