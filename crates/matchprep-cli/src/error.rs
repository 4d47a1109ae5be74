//! Error types for the matchprep CLI
//!
//! CLI errors are user-facing: each message says what went wrong and what to
//! check or run next.

use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// Error type for CLI operations
#[derive(Error, Debug)]
pub enum CliError {
    /// Required input file is missing or unreadable
    #[error("Input file error for '{path}': {message}. Verify the path exists and is readable.")]
    Input { path: String, message: String },

    /// An input line did not parse
    #[error("Failed to parse {path}:{line}: {message}. Check the record format at that line.")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    /// Inputs are structurally inconsistent (e.g. no sequences at all)
    #[error("Invalid inputs: {0}")]
    InvalidInputs(String),

    /// Pipeline run failed
    #[error("Pipeline failed: {0}")]
    Pipeline(#[from] matchprep_core::PrepError),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// JSON parsing failed
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create an input file error
    pub fn input(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Input {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-inputs error
    pub fn invalid_inputs(msg: impl Into<String>) -> Self {
        Self::InvalidInputs(msg.into())
    }
}
