//! Error types for cctally
//!
//! All errors derive from `thiserror` for convenient error handling and
//! automatic `From` implementations.
//!
//! # Example
//!
//! ```
//! use cctally::error::{CctallyError, Result};
//!
//! fn example_function() -> Result<()> {
//!     // This will automatically convert io::Error to CctallyError
//!     let _file = std::fs::read_to_string("nonexistent.txt")?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for cctally operations
#[derive(Error, Debug)]
pub enum CctallyError {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// No Claude data directories found
    #[error("No Claude data directories found")]
    NoDataDirectory,

    /// Invalid date format
    #[error("Invalid date format: {0}")]
    InvalidDate(String),

    /// Parse error with file context
    #[error("Parse error in {file}: {error}")]
    Parse {
        /// The file that caused the error
        file: PathBuf,
        /// The error message
        error: String,
    },

    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A usage record violated the billing-block ordering invariant
    ///
    /// Raised when a record's timestamp precedes the established block anchor
    /// after sorting. This indicates a bug in block reconstruction rather than
    /// bad input, so it is surfaced instead of silently dropping the record.
    #[error("billing block ordering violation: {0}")]
    BlockOrdering(String),
}

/// Convenience type alias for Results in cctally
pub type Result<T> = std::result::Result<T, CctallyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CctallyError::NoDataDirectory;
        assert_eq!(error.to_string(), "No Claude data directories found");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CctallyError = io_error.into();
        assert!(matches!(err, CctallyError::Io(_)));
    }
}
