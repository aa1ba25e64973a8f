//! Digest Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A digest error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for digest operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Hex digests are exactly 40 characters; anything else is rejected
    /// before decoding is attempted.
    #[display("invalid digest length: expected 40 hex characters, got {_0}")]
    InvalidLength(#[error(not(source))] usize),
    #[display("digest contains non-hexadecimal characters")]
    InvalidHex,
    /// Reading the stream being hashed failed.
    #[display("I/O error while hashing: {_0}")]
    Io(IoError),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_io_is_retryable() {
        assert!(ErrorKind::Io(IoError::other("disk went away")).is_retryable());
        assert!(!ErrorKind::InvalidHex.is_retryable());
        assert!(!ErrorKind::InvalidLength(39).is_retryable());
    }
}
