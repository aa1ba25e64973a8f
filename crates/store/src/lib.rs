//! Per-artifact records and their integrity verification.
//!
//! Each locally stored artifact has a JSON record describing the remote
//! snapshot it was downloaded from and the SHA-1 digests of its tracked files.
//! The record is only trusted after [`Repository::check`] has re-hashed
//! everything it vouches for; see that method for the full cascade.

pub mod error;
pub mod models;
mod repo;

pub use crate::models::{ModMetadata, ModRecord};
pub use crate::repo::{INFO_FILE, MAIN_FILE, MANIFEST_FILE, Miss, RECORD_FILE, Repository, Verdict};
