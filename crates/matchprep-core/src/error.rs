//! Error types for match post-processing
//!
//! Transient store failures are the only condition handled locally (by the
//! retry wrapper). Everything else propagates to the pipeline, which marks
//! the run failed; no error is logged-and-ignored.

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, PrepError>;

/// Error type for match post-processing and output preparation
#[derive(Error, Debug)]
pub enum PrepError {
    /// Backing store stayed unavailable through the whole retry budget.
    /// Fatal: no partial or degraded result is returned.
    #[error("Store unavailable for key '{key}' after {attempts} attempts: {message}")]
    StoreUnavailable {
        key: String,
        attempts: u32,
        message: String,
    },

    /// The readiness barrier was not satisfied within the configured ceiling.
    #[error("Partition barrier not satisfied after {waited_secs}s: {ready} of {expected} partitions ready")]
    CoordinationTimeout {
        ready: usize,
        expected: usize,
        waited_secs: u64,
    },

    /// A raw hit references a model the registry does not know. Dropping the
    /// match silently would corrupt output, so this is fatal for the sequence.
    #[error("No metadata for model '{model_id}' referenced by sequence {sequence_id}")]
    MissingModelMetadata { model_id: String, sequence_id: u64 },

    /// A hit's coordinates fall outside the sequence bounds.
    #[error("Location {start}..{end} for model '{model_id}' outside [1, {length}] on sequence {sequence_id}")]
    LocationOutOfBounds {
        sequence_id: u64,
        model_id: String,
        start: u32,
        end: u32,
        length: u32,
    },

    /// A site residue token did not parse as `<symbol><position>`.
    #[error("Malformed residue token '{token}' in site '{title}'")]
    InvalidSiteResidues { token: String, title: String },

    /// Writing to the output sink failed. Entities already flushed remain on
    /// disk for operator inspection; the whole unit of work must be re-run.
    #[error("Output write failed: {0}")]
    OutputWriteFailed(#[source] std::io::Error),

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File system operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// A partition worker task died without reporting a typed error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PrepError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
