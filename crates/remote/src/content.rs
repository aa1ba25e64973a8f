use crate::error::Result;
use async_trait::async_trait;
use modvault_store::models::{ChunkDescriptor, Manifest};

/// Key needed to decrypt a depot's chunks.
#[derive(Clone, PartialEq, Eq)]
pub struct DepotKey(pub Vec<u8>);

impl std::fmt::Debug for DepotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DepotKey(..)")
    }
}

/// Versioned content-distribution backend.
///
/// Session handling, CDN selection and chunk decryption all live behind this
/// trait. Implementations don't retry: a failed call surfaces immediately.
#[async_trait]
pub trait ContentClient: Send + Sync {
    /// Fetch the manifest for a published content id, with filenames
    /// already decrypted where possible.
    async fn get_manifest(&self, app: u32, depot: u32, content: u64) -> Result<Manifest>;

    async fn get_depot_key(&self, app: u32, depot: u32) -> Result<DepotKey>;

    /// Download, decrypt and decompress one chunk.
    async fn download_chunk(&self, depot: u32, chunk: &ChunkDescriptor, key: &DepotKey) -> Result<Vec<u8>>;
}
