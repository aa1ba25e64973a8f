//! Bulk synchronization against the remote catalog.

use crate::catalog;
use crate::context::Context;
use crate::download::{download, probe_preview};
use crate::error::{Error, ErrorKind, Result};
use async_stream::stream;
use derive_more::Display;
use futures::{Stream, StreamExt};
use modvault_store::{ModMetadata, ModRecord};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SyncMode {
    /// Download anything missing or out of date.
    #[display("full")]
    Full,
    /// Only refresh the catalog snapshot of records that already verify.
    #[display("info-only")]
    InfoOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SyncEventKind {
    /// The local record verified and matches the catalog.
    Valid,
    /// A record existed but had to be downloaded again.
    Update,
    /// The item had never been stored before.
    Download,
    /// The item couldn't be brought up to date.
    Failed,
    /// The local record verified and only its catalog snapshot changed.
    UpdateInfo,
}

/// Progress report for one catalog item.
#[derive(Debug)]
pub struct SyncEvent {
    pub kind: SyncEventKind,
    pub id: u64,
    pub record: Option<ModRecord>,
    /// Time spent downloading; zero when nothing was downloaded.
    pub elapsed: Duration,
    pub error: Option<Error>,
}

impl SyncEvent {
    fn new(kind: SyncEventKind, id: u64, record: Option<ModRecord>) -> Self {
        Self { kind, id, record, elapsed: Duration::ZERO, error: None }
    }

    fn failed(id: u64, elapsed: Duration, error: Error) -> Self {
        Self { kind: SyncEventKind::Failed, id, record: None, elapsed, error: Some(error) }
    }
}

enum Outcome {
    Skipped,
    Event(SyncEvent),
    /// The item failed at connection level; report it, then stop.
    Abort(SyncEvent),
}

/// Bring the local store in line with the remote catalog.
///
/// Items are processed `settings.sync.concurrency` at a time, each under the
/// same per-id guard the refresh cache uses, and reported as they finish.
///
/// The stream ends with an error if the catalog can't be paged through, if the
/// token is cancelled, or after an item failed with a connection-level error;
/// every other failure is only reported as a [`SyncEventKind::Failed`] event.
/// Once the batch is doomed no new items are started, but items already in
/// flight run to completion and are reported before the error.
pub fn sync<'a>(
    ctx: &'a Context,
    mode: SyncMode,
    cancel: &'a CancellationToken,
) -> impl Stream<Item = Result<SyncEvent>> + 'a {
    // `rustfmt` does not format macros that use braces. Wrap in parentheses!
    stream!({
        tracing::info!(%mode, concurrency = ctx.settings.sync.concurrency, "Synchronizing with catalog");
        let stop = CancellationToken::new();
        let outcomes = catalog::items(ctx, cancel)
            .take_until(stop.clone().cancelled_owned())
            .map(|item| async move {
                match item {
                    Ok(item) => Ok(process(ctx, item, mode, cancel).await),
                    Err(e) => Err(e),
                }
            })
            .buffer_unordered(ctx.settings.sync.concurrency.max(1));
        futures::pin_mut!(outcomes);

        let mut fatal = None;
        let mut counts = [0usize; 5];
        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Ok(Outcome::Skipped) => {},
                Ok(Outcome::Event(event)) => {
                    counts[event.kind as usize] += 1;
                    yield Ok(event);
                },
                Ok(Outcome::Abort(event)) => {
                    counts[event.kind as usize] += 1;
                    if fatal.is_none() {
                        tracing::error!(id = event.id, "Connection lost; aborting synchronization");
                        fatal = Some(exn::Exn::from(ErrorKind::Aborted(event.id)));
                    }
                    stop.cancel();
                    yield Ok(event);
                },
                Err(e) => {
                    tracing::error!(error = ?e, "Catalog unavailable; aborting synchronization");
                    stop.cancel();
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                },
            }
        }
        let [valid, update, download, failed, update_info] = counts;
        tracing::info!(valid, update, download, failed, update_info, "Synchronization finished");
        if let Some(e) = fatal {
            yield Err(e);
        }
    })
}

#[tracing::instrument(level = "debug", skip_all, fields(id = item.id))]
async fn process(ctx: &Context, item: ModMetadata, mode: SyncMode, cancel: &CancellationToken) -> Outcome {
    let id = item.id;
    if !item.is_valid() {
        return match mode {
            SyncMode::Full => {
                tracing::debug!(result = item.result, "Catalog reports item as unusable");
                Outcome::Event(SyncEvent::failed(id, Duration::ZERO, exn::Exn::from(ErrorKind::InvalidItem(id))))
            },
            SyncMode::InfoOnly => Outcome::Skipped,
        };
    }

    let handle = ctx.cache.slot(id);
    let mut slot = handle.lock().await;

    if let Some(record) = ctx.repo.verify(id, Some(item.updated)).await {
        let event = refresh_info(ctx, record, &item, cancel).await;
        if let Some(record) = &event.record {
            slot.fill(Some(record.clone()));
        }
        return Outcome::Event(event);
    }
    if mode == SyncMode::InfoOnly {
        return Outcome::Skipped;
    }

    let existed = match ctx.repo.exists(id).await {
        Ok(existed) => existed,
        Err(e) => {
            tracing::debug!(error = ?e, "Could not check for an existing record");
            false
        },
    };
    let started = Instant::now();
    let attempts = ctx.settings.sync.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Outcome::Skipped;
        }
        match download(ctx, &item, cancel).await {
            Ok(record) => {
                slot.fill(Some(record.clone()));
                let kind = if existed { SyncEventKind::Update } else { SyncEventKind::Download };
                let mut event = SyncEvent::new(kind, id, Some(record));
                event.elapsed = started.elapsed();
                return Outcome::Event(event);
            },
            Err(e) if matches!(&*e, ErrorKind::Cancelled) => return Outcome::Skipped,
            Err(e) if attempt < attempts => {
                tracing::warn!(attempt, error = ?e, "Download failed; retrying");
            },
            Err(e) => {
                tracing::warn!(attempt, error = ?e, "Download failed; giving up");
                let connection = e.is_connection();
                let event = SyncEvent::failed(id, started.elapsed(), e);
                return if connection { Outcome::Abort(event) } else { Outcome::Event(event) };
            },
        }
    }
}

/// Bring a verified record's catalog snapshot up to date.
async fn refresh_info(ctx: &Context, mut record: ModRecord, item: &ModMetadata, cancel: &CancellationToken) -> SyncEvent {
    if !record.metadata.secondary_fields_differ(item) {
        return SyncEvent::new(SyncEventKind::Valid, record.id, Some(record));
    }
    let preview_changed = record.metadata.preview_url != item.preview_url;
    record.metadata.absorb_secondary_fields(item);
    record.metadata.intern(ctx.repo.pool());
    if preview_changed {
        record.extended.preview_media_type = probe_preview(ctx, item.preview_url.as_deref(), cancel).await;
    }
    match ctx.repo.save(&record).await {
        Ok(()) => {
            tracing::info!(id = record.id, preview_changed, "Updated catalog snapshot");
            SyncEvent::new(SyncEventKind::UpdateInfo, record.id, Some(record))
        },
        Err(e) => {
            tracing::warn!(id = record.id, error = ?e, "Could not save updated snapshot");
            SyncEvent::failed(record.id, Duration::ZERO, e.raise(ErrorKind::Storage))
        },
    }
}
