use modvault_digest::Digest;
use serde::{Deserialize, Serialize};

/// Depot manifest describing a UGC artifact's published files.
///
/// Supplied by the content delivery client and persisted verbatim (as JSON)
/// next to the artifact's record, so that later verifications can check the
/// declared hashes without going back to the network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub files: Vec<ManifestEntry>,
    /// An unresolved manifest still has encrypted filenames; it's never
    /// trusted.
    #[serde(default)]
    pub filenames_encrypted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Path relative to the artifact directory, always `/`-separated.
    pub path: String,
    pub size: u64,
    /// Content hash; directories don't have one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<Digest>,
    #[serde(default)]
    pub is_directory: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<ChunkDescriptor>,
}

/// Location of one chunk inside a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    /// Chunks are content-addressed by the SHA-1 of their plaintext.
    pub id: Digest,
    pub offset: u64,
    pub compressed_len: u32,
    pub uncompressed_len: u32,
    pub checksum: u32,
}

impl Manifest {
    /// Find a regular file entry by its relative path.
    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.regular_files().find(|entry| entry.path == path)
    }

    pub fn regular_files(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.files.iter().filter(|entry| !entry.is_directory)
    }

    /// Total uncompressed size of every regular file.
    pub fn total_size(&self) -> u64 {
        self.regular_files().map(|entry| entry.size).sum()
    }

    /// Rewrite Windows-style separators that some publishing tools leave in
    /// entry paths.
    pub fn normalize_paths(&mut self) {
        for entry in &mut self.files {
            if entry.path.contains('\\') {
                entry.path = entry.path.replace('\\', "/");
            }
        }
    }
}

impl ManifestEntry {
    /// Chunks in file order.
    pub fn sorted_chunks(&self) -> Vec<&ChunkDescriptor> {
        let mut chunks: Vec<_> = self.chunks.iter().collect();
        chunks.sort_by_key(|chunk| chunk.offset);
        chunks
    }
}
