//! Common error types for baton.
//!
//! This module provides the shared error type [`enum@Error`] and the
//! convenience alias [`Result`]. Task-level failures (posting to a stopped
//! runner, misusing a chain) live in `baton_task::TaskError`; this type covers
//! the concerns shared by every crate, mostly configuration.
//!
//! # Example
//!
//! ```rust
//! use baton_common::{Error, Result};
//!
//! fn validate_threads(threads: usize) -> Result<()> {
//!     if threads == 0 {
//!         return Err(Error::Config("pool_threads must be > 0".to_string()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for baton operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error.
    ///
    /// Wraps standard I/O errors, e.g. while spawning a thread.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    ///
    /// Occurs when configuration is invalid or cannot be parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid argument error.
    ///
    /// Occurs when a caller passes a value outside the accepted range
    /// (for example a zero period for a periodic task).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("pool_threads must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: pool_threads must be > 0"
        );

        let err = Error::InvalidArgument("period".to_string());
        assert_eq!(err.to_string(), "Invalid argument: period");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
