//! Interfaces to everything modvault talks to over the network.
//!
//! - [`MetadataResolver`]: the remote catalog.
//! - [`ContentClient`]: depot manifests and chunks for UGC artifacts.
//! - [`PackageSource`]: direct package downloads and preview probing.
//!
//! None of these retry internally. Retry policy belongs to the synchronizer,
//! which can tell a flaky item from a dead connection.

mod buffer;
mod catalog;
mod content;
pub mod error;
#[cfg(feature = "mock")]
mod mock;
mod package;

pub use crate::buffer::{BufferPool, PackageBuffer};
pub use crate::catalog::{CatalogPage, MetadataResolver};
pub use crate::content::{ContentClient, DepotKey};
#[cfg(feature = "mock")]
pub use crate::mock::{MockContentClient, MockPackageSource, MockResolver};
#[cfg(feature = "http")]
pub use crate::package::HttpPackageSource;
pub use crate::package::{PackageSource, SNIFF_LEN, bounded};
