//! Store Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.
//!
//! Integrity failures are *not* errors: verification reports them as a
//! [`Miss`](crate::Miss). These kinds cover the repository failing to do its
//! job at all.

use derive_more::{Display, Error};

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A storage backend operation failed.
    #[display("storage backend error")]
    Storage,
    /// A persisted document could not be encoded or decoded.
    #[display("invalid record data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
    /// Hashing a content file failed part-way through.
    #[display("failed to hash content")]
    Hashing,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Hashing)
    }
}
