//! Error handling for the binned feature store.
//!
//! Contract violations that would corrupt lock-free loading (pushing after
//! the load barrier, reading before it) are asserted rather than returned;
//! recoverable failures (corrupt byte images, writer failures) surface as
//! typed errors through [`Result`].

use std::io;
use thiserror::Error;

/// Main error type for the feature store.
#[derive(Error, Debug)]
pub enum BinFeatError {
    /// A caller-side contract violation detected at a checkable boundary:
    /// mapper/count mismatches at construction, duplicate row pushes
    /// surfacing at merge time, double `finish_load`.
    #[error("precondition violated: {message}")]
    Precondition { message: String },

    /// Deserialization encountered a truncated buffer or impossible field.
    #[error("corrupt image: {message}")]
    CorruptImage { message: String },

    /// An index fell outside the valid row range.
    #[error("index out of range: index {index}, length {length}")]
    OutOfRange { index: usize, length: usize },

    /// A writer accepted fewer bytes than requested.
    #[error("short write: wrote {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// File I/O errors.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// JSON serialization errors (debug/metadata export paths).
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl BinFeatError {
    /// Create a precondition error.
    pub fn precondition<S: Into<String>>(message: S) -> Self {
        BinFeatError::Precondition {
            message: message.into(),
        }
    }

    /// Create a corrupt image error.
    pub fn corrupt<S: Into<String>>(message: S) -> Self {
        BinFeatError::CorruptImage {
            message: message.into(),
        }
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BinFeatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BinFeatError::corrupt("truncated mapper table");
        assert_eq!(err.to_string(), "corrupt image: truncated mapper table");

        let err = BinFeatError::OutOfRange {
            index: 12,
            length: 10,
        };
        assert_eq!(err.to_string(), "index out of range: index 12, length 10");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let err: BinFeatError = io_err.into();
        assert!(matches!(err, BinFeatError::Io { .. }));
    }
}
