//! Keeping the local store in step with the remote catalog.
//!
//! [`Context`] bundles the repository with the remote collaborators. On top
//! of it sit three entry points:
//!
//! - [`download`] fetches one artifact's content and records it.
//! - [`RefreshCache`] serves point lookups, asking the remote catalog at most
//!   once per TTL and never twice at the same time for the same id.
//! - [`sync`] walks the whole catalog with bounded concurrency, streaming a
//!   [`SyncEvent`] per item.

pub mod catalog;
mod context;
mod download;
pub mod error;
mod refresh;
mod sync;
#[cfg(test)]
mod testing;

pub use crate::context::Context;
pub use crate::download::download;
pub use crate::refresh::RefreshCache;
pub use crate::sync::{SyncEvent, SyncEventKind, SyncMode, sync};
