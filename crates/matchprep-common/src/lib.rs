//! matchprep common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities and error handling for the matchprep workspace.
//!
//! # Overview
//!
//! This crate provides functionality used across all matchprep workspace
//! members:
//!
//! - **Error Handling**: the shared base error type
//! - **Logging**: tracing subscriber setup with console and file output
//! - **Checksums**: output-file integrity digests
//!
//! # Example
//!
//! ```no_run
//! use matchprep_common::checksum::sha256_file;
//! use matchprep_common::Result;
//!
//! fn describe(path: &str) -> Result<()> {
//!     let digest = sha256_file(path)?;
//!     tracing::info!(path = %path, digest = %digest, "finalized output");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};
