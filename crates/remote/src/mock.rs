//! In-memory collaborators for testing.
//!
//! Each mock counts its calls and can be told to fail the next `n` requests,
//! which is all the synchronizer's retry and fallback paths need.

use crate::buffer::{BufferPool, PackageBuffer};
use crate::catalog::{CatalogPage, MetadataResolver};
use crate::content::{ContentClient, DepotKey};
use crate::error::{ErrorKind, Result};
use crate::package::{PackageSource, bounded};
use async_trait::async_trait;
use exn::ResultExt;
use modvault_digest::Digest;
use modvault_store::ModMetadata;
use modvault_store::models::{ChunkDescriptor, Manifest, ManifestEntry};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pops one pending failure, if any are left.
#[derive(Debug, Default)]
struct Failures(AtomicU32);
impl Failures {
    fn set(&self, count: u32) {
        self.0.store(count, Ordering::SeqCst);
    }

    fn take(&self) -> bool {
        self.0.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
    }
}

// =============================================================================
// Metadata resolver
// =============================================================================

/// Catalog backed by an ordered list of snapshots.
///
/// Duplicates are allowed in the list (to simulate items shifting between
/// pages while paginating); `details` answers with the last one.
#[derive(Debug, Default)]
pub struct MockResolver {
    items: RwLock<Vec<ModMetadata>>,
    total_override: RwLock<Option<u64>>,
    failing_details: RwLock<HashSet<u64>>,
    page_failures: Failures,
    latency: RwLock<Duration>,
    query_calls: AtomicUsize,
    details_calls: AtomicUsize,
}

impl MockResolver {
    pub fn new(items: impl IntoIterator<Item = ModMetadata>) -> Self {
        Self { items: RwLock::new(items.into_iter().collect()), ..Default::default() }
    }

    /// Add or replace an item.
    pub fn upsert(&self, item: ModMetadata) {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        match items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
    }

    /// Report a different total than the number of items.
    pub fn with_total(self, total: u64) -> Self {
        *self.total_override.write().unwrap_or_else(PoisonError::into_inner) = Some(total);
        self
    }

    /// Delay every call, to widen race windows.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.write().unwrap_or_else(PoisonError::into_inner) = latency;
        self
    }

    /// Make `details` fail with a connection error for `id` until cleared.
    pub fn fail_details(&self, id: u64, failing: bool) {
        let mut set = self.failing_details.write().unwrap_or_else(PoisonError::into_inner);
        if failing {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    /// Fail the next `count` page queries.
    pub fn fail_next_pages(&self, count: u32) {
        self.page_failures.set(count);
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn details_calls(&self) -> usize {
        self.details_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let latency = *self.latency.read().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl MetadataResolver for MockResolver {
    async fn query(&self, page: u32, page_size: u32) -> Result<CatalogPage> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.page_failures.take() {
            exn::bail!(ErrorKind::Connection);
        }
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        let total = self.total_override.read().unwrap_or_else(PoisonError::into_inner).unwrap_or(items.len() as u64);
        let start = (page.max(1) as usize - 1) * page_size as usize;
        let page_items = items.iter().skip(start).take(page_size as usize).cloned().collect();
        Ok(CatalogPage { items: page_items, total })
    }

    async fn details(&self, id: u64) -> Result<ModMetadata> {
        self.details_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.failing_details.read().unwrap_or_else(PoisonError::into_inner).contains(&id) {
            exn::bail!(ErrorKind::Connection);
        }
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        match items.iter().rev().find(|item| item.id == id) {
            Some(item) => Ok(item.clone()),
            None => exn::bail!(ErrorKind::NotFound),
        }
    }
}

// =============================================================================
// Content client
// =============================================================================

/// Depot content held in memory. Chunks are stored in plaintext and the
/// depot key is ignored.
#[derive(Debug, Default)]
pub struct MockContentClient {
    manifests: RwLock<HashMap<u64, Manifest>>,
    chunks: RwLock<HashMap<Digest, Vec<u8>>>,
    chunk_size: usize,
    chunk_failures: Failures,
    corrupt_chunks: Failures,
    manifest_failures: Failures,
    chunk_calls: AtomicUsize,
}

impl MockContentClient {
    pub fn new() -> Self {
        Self { chunk_size: 4, ..Default::default() }
    }

    /// Split files into chunks of `size` bytes.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Publish a set of files under `content`, replacing what was there.
    pub fn publish<'a>(&self, content: u64, files: impl IntoIterator<Item = (&'a str, &'a [u8])>) {
        let chunk_size = self.chunk_size.max(1);
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        let mut manifest = Manifest::default();
        for (path, data) in files {
            let mut entry = ManifestEntry {
                path: path.to_string(),
                size: data.len() as u64,
                hash: Some(Digest::of(data)),
                is_directory: false,
                chunks: Vec::new(),
            };
            for (index, piece) in data.chunks(chunk_size).enumerate() {
                let id = Digest::of(piece);
                entry.chunks.push(ChunkDescriptor {
                    id,
                    offset: (index * chunk_size) as u64,
                    compressed_len: piece.len() as u32,
                    uncompressed_len: piece.len() as u32,
                    checksum: 0,
                });
                chunks.insert(id, piece.to_vec());
            }
            manifest.files.push(entry);
        }
        self.manifests.write().unwrap_or_else(PoisonError::into_inner).insert(content, manifest);
    }

    /// Publish a manifest as-is, without any chunk data behind it.
    pub fn publish_manifest(&self, content: u64, manifest: Manifest) {
        self.manifests.write().unwrap_or_else(PoisonError::into_inner).insert(content, manifest);
    }

    /// Fail the next `count` chunk downloads with a connection error.
    pub fn fail_next_chunks(&self, count: u32) {
        self.chunk_failures.set(count);
    }

    /// Serve the next `count` chunks with a flipped byte.
    pub fn corrupt_next_chunks(&self, count: u32) {
        self.corrupt_chunks.set(count);
    }

    /// Fail the next `count` manifest requests with a connection error.
    pub fn fail_next_manifests(&self, count: u32) {
        self.manifest_failures.set(count);
    }

    pub fn chunk_calls(&self) -> usize {
        self.chunk_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentClient for MockContentClient {
    async fn get_manifest(&self, _app: u32, _depot: u32, content: u64) -> Result<Manifest> {
        if self.manifest_failures.take() {
            exn::bail!(ErrorKind::Connection);
        }
        let manifests = self.manifests.read().unwrap_or_else(PoisonError::into_inner);
        match manifests.get(&content) {
            Some(manifest) => Ok(manifest.clone()),
            None => exn::bail!(ErrorKind::NotFound),
        }
    }

    async fn get_depot_key(&self, _app: u32, _depot: u32) -> Result<DepotKey> {
        Ok(DepotKey(vec![0; 32]))
    }

    async fn download_chunk(&self, _depot: u32, chunk: &ChunkDescriptor, _key: &DepotKey) -> Result<Vec<u8>> {
        self.chunk_calls.fetch_add(1, Ordering::SeqCst);
        if self.chunk_failures.take() {
            exn::bail!(ErrorKind::Connection);
        }
        let mut data = match self.chunks.read().unwrap_or_else(PoisonError::into_inner).get(&chunk.id) {
            Some(data) => data.clone(),
            None => exn::bail!(ErrorKind::NotFound),
        };
        if self.corrupt_chunks.take()
            && let Some(first) = data.first_mut()
        {
            *first ^= 0xFF;
        }
        Ok(data)
    }
}

// =============================================================================
// Package source
// =============================================================================

/// Packages and media types keyed by URL.
#[derive(Debug, Default)]
pub struct MockPackageSource {
    packages: RwLock<HashMap<String, Vec<u8>>>,
    media_types: RwLock<HashMap<String, String>>,
    pool: Arc<BufferPool>,
    fetch_failures: Failures,
    failure_kind: RwLock<Option<fn() -> ErrorKind>>,
    latency: RwLock<Duration>,
    fetch_calls: AtomicUsize,
    probe_calls: AtomicUsize,
}

impl MockPackageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.packages.write().unwrap_or_else(PoisonError::into_inner).insert(url.into(), data.into());
    }

    pub fn insert_media_type(&self, url: impl Into<String>, media_type: impl Into<String>) {
        self.media_types.write().unwrap_or_else(PoisonError::into_inner).insert(url.into(), media_type.into());
    }

    /// Fail the next `count` fetches with the given error kind.
    pub fn fail_next_fetches(&self, count: u32, kind: fn() -> ErrorKind) {
        *self.failure_kind.write().unwrap_or_else(PoisonError::into_inner) = Some(kind);
        self.fetch_failures.set(count);
    }

    /// Delay every fetch; combined with a short timeout this exercises the
    /// timeout path.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.write().unwrap_or_else(PoisonError::into_inner) = latency;
        self
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    async fn serve(&self, url: &str) -> Result<PackageBuffer> {
        let latency = *self.latency.read().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.fetch_failures.take() {
            let kind = self.failure_kind.read().unwrap_or_else(PoisonError::into_inner).unwrap_or(|| ErrorKind::Connection);
            exn::bail!(kind());
        }
        let data = match self.packages.read().unwrap_or_else(PoisonError::into_inner).get(url) {
            Some(data) => data.clone(),
            None => exn::bail!(ErrorKind::Status(404)),
        };
        let mut buffer = PackageBuffer::new(data.len() as u64, u64::MAX, &self.pool).or_raise(|| ErrorKind::Spool)?;
        buffer.append(&data).or_raise(|| ErrorKind::Spool)?;
        Ok(buffer)
    }
}

#[async_trait]
impl PackageSource for MockPackageSource {
    async fn fetch(
        &self,
        url: &str,
        _declared_size: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PackageBuffer> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        bounded(self.serve(url), timeout, cancel).await
    }

    async fn probe_media_type(&self, url: &str) -> Result<Option<String>> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.media_types.read().unwrap_or_else(PoisonError::into_inner).get(url).cloned())
    }
}
