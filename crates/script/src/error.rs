//! Script Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Nothing in this crate lets these escape past
//! [`Normalizer::derive`](crate::Normalizer::derive): a malformed script means
//! "no script metadata", never a failed download.

use derive_more::{Display, Error};

/// A script error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for script operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// There was no script to evaluate.
    #[display("script is empty")]
    EmptyScript,
    /// The evaluator rejected or failed to run the script.
    #[display("script evaluation failed")]
    Evaluation,
    /// A field the metadata relies on has the wrong shape.
    #[display("malformed script field `{_0}`")]
    MalformedField(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
