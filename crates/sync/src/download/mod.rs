//! The download pipeline.
//!
//! Fetches an artifact's tracked content, either chunk by chunk from the
//! depot (UGC) or as a zip package, then derives its script metadata and
//! persists a fresh record. The record written here is only trusted once
//! the repository verifies it again.

mod package;
mod ugc;

use crate::context::Context;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use modvault_digest::{Digest, TrackedDigest};
use modvault_store::models::ExtendedInfo;
use modvault_store::{INFO_FILE, ModMetadata, ModRecord, Repository};
use std::path::Path;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What a content download left on disk.
struct Fetched {
    manifest_digest: Option<Digest>,
    info_digest: TrackedDigest,
    main_digest: TrackedDigest,
    size: u64,
}

/// Download `metadata`'s content and persist a record describing it.
///
/// `metadata` is the catalog snapshot the record will carry; it isn't
/// fetched again.
#[tracing::instrument(level = "debug", skip_all, fields(id = metadata.id, ugc = metadata.is_ugc()))]
pub async fn download(ctx: &Context, metadata: &ModMetadata, cancel: &CancellationToken) -> Result<ModRecord> {
    if !metadata.is_valid() {
        exn::bail!(ErrorKind::InvalidItem(metadata.id));
    }
    if cancel.is_cancelled() {
        exn::bail!(ErrorKind::Cancelled);
    }
    let started = Instant::now();
    let fetched = if metadata.is_ugc() {
        ugc::fetch(ctx, metadata, cancel).await?
    } else {
        package::fetch(ctx, metadata, cancel).await?
    };

    let script = match fetched.info_digest {
        TrackedDigest::Absent => None,
        TrackedDigest::Present(_) => {
            let source = ctx
                .repo
                .backend()
                .read(&Repository::artifact_path(metadata.id, INFO_FILE))
                .await
                .or_raise(|| ErrorKind::Storage)?;
            ctx.normalizer.derive(&String::from_utf8_lossy(&source), metadata.id)
        },
    };

    // Translations are maintained locally and survive re-downloads.
    let previous = match ctx.repo.load(metadata.id).await {
        Ok(previous) => previous,
        Err(e) => {
            tracing::debug!(error = ?e, "Previous record unreadable; starting afresh");
            None
        },
    };
    let languages = previous.map(|record| record.extended.languages).unwrap_or_default();

    let mut metadata = metadata.clone();
    metadata.intern(ctx.repo.pool());
    let record = ModRecord {
        id: metadata.id,
        updated_time: metadata.updated,
        extended: ExtendedInfo {
            size: fetched.size,
            preview_media_type: probe_preview(ctx, metadata.preview_url.as_deref(), cancel).await,
            languages,
        },
        metadata,
        manifest_digest: fetched.manifest_digest,
        info_digest: fetched.info_digest,
        main_digest: fetched.main_digest,
        script,
    };
    ctx.repo.save(&record).await.or_raise(|| ErrorKind::Storage)?;
    tracing::info!(
        id = record.id,
        size = record.extended.size,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Downloaded artifact"
    );
    Ok(record)
}

/// Detect a preview image's media type. Failures only cost the media type.
pub(crate) async fn probe_preview(ctx: &Context, url: Option<&str>, cancel: &CancellationToken) -> Option<String> {
    let url = url.filter(|url| !url.is_empty())?;
    match cancellable(cancel, ctx.packages.probe_media_type(url)).await {
        Ok(media_type) => media_type,
        Err(e) => {
            tracing::debug!(url, error = ?e, "Could not detect preview media type");
            None
        },
    }
}

/// Race a remote call against `cancel`.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = modvault_remote::error::Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
        result = work => result.map_err(ErrorKind::remote),
    }
}

/// Remove a tracked file the new content no longer has.
async fn remove_stale(ctx: &Context, path: &Path) -> Result<()> {
    match ctx.repo.backend().delete(path).await {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Removed stale file");
            Ok(())
        },
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e).or_raise(|| ErrorKind::Storage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, INFO_SOURCE, packaged_item, ugc_item, zip};
    use modvault_store::models::LanguageOverride;
    use modvault_store::{MAIN_FILE, Verdict};

    #[tokio::test]
    async fn test_packaged_download_verifies() {
        let harness = Harness::new();
        let item = packaged_item(1);
        harness.packages.insert(
            item.file_url.clone().unwrap(),
            zip(&[(INFO_FILE, INFO_SOURCE), (MAIN_FILE, "-- main"), ("scripts/extra.lua", "x")]),
        );
        harness.packages.insert_media_type(item.preview_url.clone().unwrap(), "image/png");

        let record = download(&harness.ctx, &item, &CancellationToken::new()).await.unwrap();
        assert!(!record.is_ugc());
        assert_eq!(record.info_digest, TrackedDigest::Present(Digest::of(INFO_SOURCE)));
        assert_eq!(record.main_digest, TrackedDigest::Present(Digest::of(b"-- main")));
        assert_eq!(record.extended.size, item.file_size);
        assert_eq!(record.extended.preview_media_type.as_deref(), Some("image/png"));
        assert_eq!(&*record.script.as_ref().unwrap().name, "Test Mod");

        let verified = harness.ctx.repo.verify(1, Some(item.updated)).await.unwrap();
        assert_eq!(verified, record);
    }

    #[tokio::test]
    async fn test_ugc_download_verifies() {
        let harness = Harness::new();
        let item = ugc_item(2);
        harness.content.publish(
            item.content_file,
            [(INFO_FILE, INFO_SOURCE.as_bytes()), (MAIN_FILE, b"print('hello world')".as_slice())],
        );

        let record = download(&harness.ctx, &item, &CancellationToken::new()).await.unwrap();
        assert!(record.is_ugc());
        assert_eq!(record.main_digest, TrackedDigest::Present(Digest::of(b"print('hello world')")));
        assert_eq!(record.extended.size, (INFO_SOURCE.len() + 20) as u64);
        assert!(matches!(harness.ctx.repo.check(2, Some(item.updated)).await.unwrap(), Verdict::Verified(_)));
    }

    #[tokio::test]
    async fn test_invalid_item_is_rejected() {
        let harness = Harness::new();
        let item = ModMetadata { result: 2, ..packaged_item(3) };
        let err = download(&harness.ctx, &item, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidItem(3)));
        assert_eq!(harness.packages.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_languages_survive_redownload() {
        let harness = Harness::new();
        let item = packaged_item(4);
        harness.packages.insert(item.file_url.clone().unwrap(), zip(&[(MAIN_FILE, "-- main")]));
        let mut record = download(&harness.ctx, &item, &CancellationToken::new()).await.unwrap();
        record.extended.languages.insert(
            "zh".to_string(),
            LanguageOverride { name: Some("模组".to_string()), description: None },
        );
        harness.ctx.repo.save(&record).await.unwrap();

        let record = download(&harness.ctx, &item, &CancellationToken::new()).await.unwrap();
        assert_eq!(record.extended.languages["zh"].name.as_deref(), Some("模组"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let harness = Harness::new();
        let item = packaged_item(5);
        harness.packages.insert(item.file_url.clone().unwrap(), zip(&[(MAIN_FILE, "-- main")]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = download(&harness.ctx, &item, &cancel).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
        assert!(!harness.ctx.repo.exists(5).await.unwrap());
    }
}
