//! SHA-1 content digests.
//!
//! Every integrity check in modvault boils down to "does this byte stream hash
//! to the 40 hex characters we wrote down earlier?". This crate owns that
//! comparison, plus the `"0"` sentinel used for tracked files that were
//! intentionally absent when an artifact was downloaded.

mod digest;
pub mod error;
mod tracked;

pub use crate::digest::{Digest, matches_hex};
pub use crate::tracked::TrackedDigest;
