//! UGC artifacts: files assembled chunk by chunk from the depot.

use super::{Fetched, cancellable, remove_stale};
use crate::context::Context;
use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use futures::StreamExt;
use modvault_digest::{Digest, TrackedDigest};
use modvault_remote::{DepotKey, PackageBuffer};
use modvault_store::models::ManifestEntry;
use modvault_store::{INFO_FILE, MAIN_FILE, ModMetadata, Repository};
use std::collections::BTreeMap;
use std::io::{Seek, Write};
use std::path::Path;
use tokio_util::sync::CancellationToken;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Attempts per file before the whole download is given up on.
const FILE_ATTEMPTS: u32 = 3;
/// Chunks of one file requested at the same time.
const CHUNK_CONCURRENCY: usize = 8;

/// How many files of roughly this size to download at once.
fn tier_concurrency(size: u64) -> usize {
    match size {
        s if s > 10 * MIB => 1,
        s if s >= MIB => 3,
        s if s >= 100 * KIB => 10,
        _ => 30,
    }
}

pub(super) async fn fetch(ctx: &Context, metadata: &ModMetadata, cancel: &CancellationToken) -> Result<Fetched> {
    let app = ctx.settings.app_id;
    let mut manifest = cancellable(cancel, ctx.content.get_manifest(app, app, metadata.content_file)).await?;
    if manifest.filenames_encrypted {
        tracing::warn!(content = metadata.content_file, "Manifest filenames are still encrypted");
        exn::bail!(ErrorKind::Integrity);
    }
    manifest.normalize_paths();
    let key = cancellable(cancel, ctx.content.get_depot_key(app, app)).await?;

    // Empty or hashless tracked files are recorded as intentionally absent.
    let tracked = [INFO_FILE, MAIN_FILE].map(|name| manifest.entry(name).filter(|e| e.size > 0 && e.hash.is_some()));
    let wanted: Vec<&ManifestEntry> = if ctx.settings.download.include_all_files {
        manifest.regular_files().collect()
    } else {
        tracked.iter().flatten().copied().collect()
    };
    let job = Job { ctx, id: metadata.id, depot: app, key: &key, cancel };
    job.fetch_all(wanted).await?;

    for (name, entry) in [INFO_FILE, MAIN_FILE].into_iter().zip(tracked) {
        if entry.is_none() {
            remove_stale(ctx, &Repository::artifact_path(metadata.id, name)).await?;
        }
    }
    let manifest_digest = ctx.repo.write_manifest(metadata.id, &manifest).await.or_raise(|| ErrorKind::Storage)?;
    let [info_digest, main_digest] = tracked.map(|entry| TrackedDigest::from(entry.and_then(|e| e.hash)));
    Ok(Fetched { manifest_digest: Some(manifest_digest), info_digest, main_digest, size: manifest.total_size() })
}

/// One artifact's worth of file downloads.
struct Job<'a> {
    ctx: &'a Context,
    id: u64,
    depot: u32,
    key: &'a DepotKey,
    cancel: &'a CancellationToken,
}

impl Job<'_> {
    /// Download `entries`, largest files first and with fewer of them in
    /// flight.
    async fn fetch_all(&self, entries: Vec<&ManifestEntry>) -> Result<()> {
        let mut tiers: BTreeMap<usize, Vec<&ManifestEntry>> = BTreeMap::new();
        for entry in entries {
            tiers.entry(tier_concurrency(entry.size)).or_default().push(entry);
        }
        for (concurrency, entries) in tiers {
            tracing::debug!(concurrency, files = entries.len(), "Downloading file tier");
            let mut results =
                futures::stream::iter(entries).map(|entry| self.fetch_file(entry)).buffer_unordered(concurrency).boxed();
            while let Some(result) = results.next().await {
                result?;
            }
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(path = %entry.path))]
    async fn fetch_file(&self, entry: &ManifestEntry) -> Result<()> {
        let path = Repository::artifact_path(self.id, &entry.path);
        let Some(expected) = entry.hash.filter(|_| entry.size > 0) else {
            return self.ctx.repo.backend().write(&path, &[]).await.or_raise(|| ErrorKind::Storage);
        };
        if self.ctx.repo.hash_file(&path).await.or_raise(|| ErrorKind::Storage)? == Some(expected) {
            tracing::debug!("Already up to date");
            return Ok(());
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            let result = match self.assemble(entry).await {
                Ok(buffer) => self.store(&path, buffer, &expected).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt < FILE_ATTEMPTS && e.is_retryable() => {
                    tracing::warn!(attempt, error = ?e, "File download failed; retrying");
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch every chunk of `entry` into a buffer.
    async fn assemble(&self, entry: &ManifestEntry) -> Result<PackageBuffer> {
        let mut buffer = PackageBuffer::new(entry.size, self.ctx.settings.download.spool_threshold, &self.ctx.buffers)
            .or_raise(|| ErrorKind::Storage)?;
        let mut chunks = futures::stream::iter(entry.sorted_chunks())
            .map(|chunk| async move {
                let data = cancellable(self.cancel, self.ctx.content.download_chunk(self.depot, chunk, self.key)).await?;
                Ok::<_, Error>((chunk.offset, data))
            })
            .buffer_unordered(CHUNK_CONCURRENCY)
            .boxed();
        while let Some(result) = chunks.next().await {
            let (offset, data) = result?;
            buffer.write_at(offset, &data).or_raise(|| ErrorKind::Storage)?;
        }
        Ok(buffer)
    }

    /// Check the assembled file against its published hash and, only then,
    /// write it out.
    async fn store(&self, path: &Path, buffer: PackageBuffer, expected: &Digest) -> Result<()> {
        let (mut buffer, actual) = tokio::task::spawn_blocking(move || -> Result<(PackageBuffer, Digest)> {
            let mut buffer = buffer;
            buffer.rewind().or_raise(|| ErrorKind::Storage)?;
            let digest = Digest::from_reader(&mut buffer).or_raise(|| ErrorKind::Storage)?;
            Ok((buffer, digest))
        })
        .await
        .or_raise(|| ErrorKind::Storage)??;
        if actual != *expected {
            tracing::warn!(%expected, %actual, "Assembled file doesn't match its published hash");
            exn::bail!(ErrorKind::Integrity);
        }

        let mut writer = self.ctx.repo.backend().writer(path).await.or_raise(|| ErrorKind::Storage)?;
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            buffer.rewind()?;
            std::io::copy(&mut buffer, &mut writer)?;
            writer.flush()
        })
        .await
        .or_raise(|| ErrorKind::Storage)?
        .or_raise(|| ErrorKind::Storage)?;
        Ok(())
    }
}
