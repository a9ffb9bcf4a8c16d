//! Error types and validation functions for GMM training and SPLICE
//! compensation.
//!
//! This module provides error handling for all estimation operations,
//! including dimensionality validation, numerical degeneracy checks, and
//! parallel-worker failure propagation.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Comprehensive error types for GMM and SPLICE operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum CompensationError {
    /// Feature vector length does not match the model dimensionality, or a
    /// stereo pair disagrees on frame count.
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension or frame count
        expected: usize,
        /// Actual dimension or frame count encountered
        actual: usize,
        /// Operation or data item where the mismatch occurred
        context: String,
    },

    /// A mixture component received zero posterior mass during an M-step.
    ///
    /// The parameter update would divide by zero; the caller must not starve
    /// a mixture of assigned data.
    #[error("Degenerate mixture {mixture}: zero posterior mass accumulated")]
    DegenerateMixture {
        /// Index of the starved mixture component
        mixture: usize,
    },

    /// A per-mixture SPLICE denominator matrix is not invertible.
    #[error("Singular system for mixture {mixture}: denominator not invertible")]
    SingularSystem {
        /// Index of the mixture whose linear system could not be solved
        mixture: usize,
    },

    /// All mixture likelihoods underflowed to zero for a feature vector.
    #[error("Numerical underflow: all {mixtures} mixture likelihoods are zero")]
    NumericalUnderflow {
        /// Mixture count of the model that produced the zero sum
        mixtures: usize,
    },

    /// A persisted model blob holds the wrong model kind.
    #[error("Invalid model type: expected {expected}, found {found}")]
    InvalidModelType {
        /// Model kind the caller asked for
        expected: &'static str,
        /// Model kind actually stored in the blob
        found: &'static str,
    },

    /// A parallel worker failed; wraps the original cause.
    ///
    /// `source` is `None` only when a worker terminated without reporting a
    /// result at all (a worker panic).
    #[error("Worker {worker} failed")]
    WorkerFailure {
        /// Index of the failed worker shard
        worker: usize,
        /// Original error raised inside the worker, if one was reported
        #[source]
        source: Option<Box<CompensationError>>,
    },

    /// Invalid parameter value for an operation.
    #[error("Invalid parameter: {parameter} = {value}, expected {constraint}")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value provided
        value: String,
        /// Valid range or constraint description
        constraint: String,
    },

    /// A feature file could not be decoded.
    #[error("Malformed feature file {path}: {reason}")]
    MalformedFeatureFile {
        /// Path of the offending file
        path: PathBuf,
        /// What was wrong with its contents
        reason: String,
    },

    /// Model (de)serialization failure.
    #[error("Serialization failed: {reason}")]
    Serialization {
        /// Underlying codec error, stringified
        reason: String,
    },

    /// I/O operation error.
    #[error("I/O operation failed: {operation}")]
    Io {
        /// I/O operation that failed, including the path involved
        operation: String,
        /// Underlying error
        #[source]
        source: Arc<std::io::Error>,
    },
}

/// Result type for GMM and SPLICE operations.
///
/// Convenience alias for operations that may fail with [`CompensationError`].
pub type CompensationResult<T> = Result<T, CompensationError>;

/// Validates that a feature vector has the expected dimensionality.
///
/// # Example
/// ```rust
/// use gmm_splice::errors::validate_dimension;
///
/// let frame = vec![1.0, 2.0, 3.0];
/// assert!(validate_dimension(&frame, 3, "likelihood").is_ok());
/// assert!(validate_dimension(&frame, 13, "likelihood").is_err());
/// ```
pub fn validate_dimension(
    frame: &[f64],
    expected: usize,
    context: &str,
) -> CompensationResult<()> {
    if frame.len() != expected {
        return Err(CompensationError::DimensionMismatch {
            expected,
            actual: frame.len(),
            context: context.to_string(),
        });
    }
    Ok(())
}

/// Validates that a count parameter is non-zero.
///
/// # Example
/// ```rust
/// use gmm_splice::errors::validate_nonzero;
///
/// assert!(validate_nonzero(4, "workers").is_ok());
/// assert!(validate_nonzero(0, "workers").is_err());
/// ```
pub fn validate_nonzero(value: usize, name: &str) -> CompensationResult<()> {
    if value == 0 {
        return Err(CompensationError::InvalidParameter {
            parameter: name.to_string(),
            value: "0".to_string(),
            constraint: "a positive count".to_string(),
        });
    }
    Ok(())
}

/// Wraps an I/O error with the operation and path that produced it.
pub(crate) fn io_error(
    operation: &str,
    path: &std::path::Path,
    source: std::io::Error,
) -> CompensationError {
    CompensationError::Io {
        operation: format!("{} {}", operation, path.display()),
        source: Arc::new(source),
    }
}
