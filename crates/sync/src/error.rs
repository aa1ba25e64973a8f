//! Sync Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A sync error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The remote end couldn't be reached, or the connection dropped.
    #[display("connection failed")]
    Connection,
    /// A remote request failed for any other reason.
    #[display("remote request failed")]
    Transport,
    /// A download didn't finish in time.
    #[display("download timed out")]
    Timeout,
    /// The caller's cancellation token fired.
    #[display("cancelled")]
    Cancelled,
    /// Downloaded content doesn't match the hash it was published with, or
    /// its manifest can't be trusted.
    #[display("downloaded content failed integrity checks")]
    Integrity,
    /// A package isn't a readable archive, or holds none of the tracked files.
    #[display("corrupt package archive")]
    CorruptArchive,
    /// Reading or writing the local store failed.
    #[display("local store error")]
    Storage,
    /// The catalog reports the item as unusable.
    #[display("item {_0} is not downloadable")]
    InvalidItem(#[error(not(source))] u64),
    /// A catalog page kept failing after every attempt.
    #[display("catalog page {_0} could not be fetched")]
    Pagination(#[error(not(source))] u32),
    /// A bulk synchronization stopped after an item lost its connection.
    #[display("synchronization aborted: connection lost while updating {_0}")]
    Aborted(#[error(not(source))] u64),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection | Self::Transport | Self::Timeout | Self::Integrity | Self::Storage => true,
            Self::Cancelled | Self::CorruptArchive | Self::InvalidItem(_) | Self::Pagination(_) | Self::Aborted(_) => {
                false
            },
        }
    }

    /// Connection-level failures abort a bulk synchronization.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection | Self::Aborted(_))
    }

    /// Wrap a remote error, keeping the distinctions callers act on.
    #[track_caller]
    pub fn remote(err: modvault_remote::error::Error) -> Error {
        use modvault_remote::error::ErrorKind as Remote;
        let kind = match &*err {
            Remote::Connection => Self::Connection,
            Remote::Timeout => Self::Timeout,
            Remote::Cancelled => Self::Cancelled,
            Remote::Spool => Self::Storage,
            Remote::Status(_) | Remote::InvalidResponse(_) | Remote::NotFound => Self::Transport,
        };
        err.raise(kind)
    }
}
