//! Remote Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A remote error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Implementations never retry internally; callers decide based on these.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The remote end couldn't be reached, or the connection dropped.
    #[display("connection failed")]
    Connection,
    /// The request didn't complete in time.
    #[display("request timed out")]
    Timeout,
    /// The remote answered with a non-success status.
    #[display("unexpected status {_0}")]
    Status(#[error(not(source))] u16),
    /// The remote answered, but not with anything usable.
    #[display("invalid response: {_0}")]
    InvalidResponse(#[error(not(source))] &'static str),
    /// The requested item doesn't exist remotely.
    #[display("not found")]
    NotFound,
    /// The caller's cancellation token fired.
    #[display("cancelled")]
    Cancelled,
    /// Buffering a download locally failed.
    #[display("could not buffer download")]
    Spool,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection | Self::Timeout | Self::Spool => true,
            Self::Status(code) => *code == 429 || *code >= 500,
            Self::InvalidResponse(_) | Self::NotFound | Self::Cancelled => false,
        }
    }

    /// Connection-level failures abort a bulk synchronization once per-item
    /// retries run out; everything else only fails the item.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection)
    }

    /// Classify a transport error, keeping it as the cause.
    #[cfg(feature = "http")]
    #[track_caller]
    pub fn transport(err: reqwest::Error) -> Error {
        let kind = if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            Self::Connection
        } else {
            Self::InvalidResponse("malformed response")
        };
        exn::Exn::from(err).raise(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::connection(ErrorKind::Connection, true)]
    #[case::timeout(ErrorKind::Timeout, true)]
    #[case::throttled(ErrorKind::Status(429), true)]
    #[case::server(ErrorKind::Status(503), true)]
    #[case::client(ErrorKind::Status(404), false)]
    #[case::cancelled(ErrorKind::Cancelled, false)]
    #[case::invalid(ErrorKind::InvalidResponse("json"), false)]
    fn test_retryable(#[case] kind: ErrorKind, #[case] retryable: bool) {
        assert_eq!(kind.is_retryable(), retryable);
    }

    #[test]
    fn test_only_connection_is_connection_level() {
        assert!(ErrorKind::Connection.is_connection());
        assert!(!ErrorKind::Timeout.is_connection());
        assert!(!ErrorKind::Status(502).is_connection());
    }
}
