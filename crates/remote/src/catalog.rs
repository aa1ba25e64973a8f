use crate::error::Result;
use async_trait::async_trait;
use modvault_store::ModMetadata;

/// One page of catalog results.
#[derive(Debug, Clone, Default)]
pub struct CatalogPage {
    pub items: Vec<ModMetadata>,
    /// Total number of items in the catalog, across all pages.
    pub total: u64,
}

/// Remote catalog/metadata query service.
///
/// The catalog doesn't filter on result codes: items that are unusable come
/// back with a non-OK `result` and it is up to the caller to skip them.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Fetch one page of the catalog. Pages are numbered from 1.
    async fn query(&self, page: u32, page_size: u32) -> Result<CatalogPage>;

    /// Fetch the current snapshot of a single item.
    async fn details(&self, id: u64) -> Result<ModMetadata>;
}
