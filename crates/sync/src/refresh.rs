//! Per-id single-flight refresh cache.
//!
//! Every id gets a slot behind its own async mutex. Whoever holds the guard
//! is the only one refreshing that id; everyone else waits and then sees the
//! freshly cached record. The bulk synchronizer takes the same guard while it
//! works on an item.

use crate::context::Context;
use crate::download::download;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::TryStreamExt;
use modvault_store::ModRecord;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub(crate) struct Slot {
    refreshed_at: Option<Instant>,
    record: Option<ModRecord>,
}

impl Slot {
    fn fresh(&self, ttl: Duration) -> Option<&ModRecord> {
        let refreshed_at = self.refreshed_at?;
        (refreshed_at.elapsed() < ttl).then_some(self.record.as_ref()).flatten()
    }

    /// Replace the cached record and restart the TTL.
    pub(crate) fn fill(&mut self, record: Option<ModRecord>) -> Option<ModRecord> {
        self.refreshed_at = Some(Instant::now());
        self.record = record;
        self.record.clone()
    }
}

pub(crate) type SlotHandle = Arc<tokio::sync::Mutex<Slot>>;

#[derive(Debug)]
pub struct RefreshCache {
    ttl: Duration,
    slots: Mutex<HashMap<u64, SlotHandle>>,
}

impl RefreshCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, slots: Mutex::new(HashMap::new()) }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The slot for `id`, created on first use.
    pub(crate) fn slot(&self, id: u64) -> SlotHandle {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(id).or_default())
    }

    /// Return a verified record for `id`, refreshing it if the cached one is
    /// older than the TTL.
    ///
    /// When the remote catalog can't be asked (or calls the item unusable),
    /// this serves whatever still verifies locally. A stale or missing local
    /// copy is downloaded again. Nothing here fails loudly: every problem ends
    /// up as a log line and `None`.
    #[tracing::instrument(level = "debug", skip(self, ctx))]
    pub async fn get_or_refresh(&self, ctx: &Context, id: u64) -> Option<ModRecord> {
        let handle = self.slot(id);
        let mut slot = handle.lock().await;
        if let Some(record) = slot.fresh(self.ttl) {
            tracing::debug!("Serving cached record");
            return Some(record.clone());
        }

        let remote = match ctx.resolver.details(id).await {
            Ok(remote) if remote.is_valid() => remote,
            Ok(remote) => {
                tracing::warn!(result = remote.result, "Remote reports item as unusable; serving local copy");
                return slot.fill(ctx.repo.verify(id, None).await);
            },
            Err(e) => {
                tracing::warn!(error = ?e, "Could not resolve remote metadata; serving local copy");
                return slot.fill(ctx.repo.verify(id, None).await);
            },
        };

        if let Some(record) = ctx.repo.verify(id, Some(remote.updated)).await {
            return slot.fill(Some(record));
        }

        match download(ctx, &remote, &CancellationToken::new()).await {
            Ok(record) => slot.fill(Some(record)),
            Err(e) => {
                tracing::warn!(error = ?e, "Download failed");
                None
            },
        }
    }

    /// Pre-fill slots with every record that verifies locally. Returns how
    /// many were loaded.
    pub async fn warm(&self, ctx: &Context) -> Result<usize> {
        let records = ctx.repo.verify_all(ctx.settings.sync.concurrency);
        futures::pin_mut!(records);
        let mut count = 0;
        while let Some(record) = records.try_next().await.or_raise(|| ErrorKind::Storage)? {
            self.slot(record.id).lock().await.fill(Some(record));
            count += 1;
        }
        tracing::info!(count, "Warmed refresh cache");
        Ok(count)
    }

    /// Drop every slot. Refreshes already in flight finish against the slot
    /// they hold, which is then forgotten.
    pub fn clear(&self) {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
