//! Paging through the remote catalog.

use crate::context::Context;
use crate::download::cancellable;
use crate::error::{ErrorKind, Result};
use async_stream::stream;
use futures::Stream;
use modvault_remote::CatalogPage;
use modvault_store::ModMetadata;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

/// Stream every catalog item once.
///
/// The first page doubles as a probe: the number of items it holds is taken
/// as the page size, and its total decides how many pages follow. Items that
/// shift into a later page while paging are only yielded the first time they
/// are seen. A page that keeps failing ends the stream with
/// [`ErrorKind::Pagination`]; cancellation ends it with
/// [`ErrorKind::Cancelled`].
pub fn items<'a>(ctx: &'a Context, cancel: &'a CancellationToken) -> impl Stream<Item = Result<ModMetadata>> + 'a {
    // `rustfmt` does not format macros that use braces. Wrap in parentheses!
    stream!({
        if cancel.is_cancelled() {
            yield Err(exn::Exn::from(ErrorKind::Cancelled));
            return;
        }
        let probe = match page(ctx, 1, ctx.settings.sync.page_probe_size, cancel).await {
            Ok(probe) => probe,
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        let page_size = probe.items.len() as u32;
        if page_size == 0 {
            tracing::info!(total = probe.total, "Catalog is empty");
            return;
        }
        let pages = probe.total.div_ceil(u64::from(page_size)).max(1);
        tracing::info!(total = probe.total, page_size, pages, "Paging through catalog");

        let mut seen = HashSet::new();
        let mut first = Some(probe.items);
        for number in 1..=pages {
            let items = match first.take() {
                Some(items) => items,
                None => {
                    if cancel.is_cancelled() {
                        yield Err(exn::Exn::from(ErrorKind::Cancelled));
                        return;
                    }
                    let Ok(number) = u32::try_from(number) else {
                        break;
                    };
                    match page(ctx, number, page_size, cancel).await {
                        Ok(page) => page.items,
                        Err(e) => {
                            yield Err(e);
                            return;
                        },
                    }
                },
            };
            for item in items {
                if seen.insert(item.id) {
                    yield Ok(item);
                } else {
                    tracing::debug!(id = item.id, page = number, "Skipping item already seen");
                }
            }
        }
    })
}

/// Fetch one page, retrying up to the configured number of attempts.
#[tracing::instrument(level = "debug", skip(ctx, cancel))]
async fn page(ctx: &Context, number: u32, size: u32, cancel: &CancellationToken) -> Result<CatalogPage> {
    let attempts = ctx.settings.sync.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match cancellable(cancel, ctx.resolver.query(number, size)).await {
            Ok(page) => return Ok(page),
            Err(e) if matches!(&*e, ErrorKind::Cancelled) => return Err(e),
            Err(e) if attempt < attempts => {
                tracing::warn!(attempt, error = ?e, "Catalog page failed; retrying");
            },
            Err(e) => return Err(e.raise(ErrorKind::Pagination(number))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, packaged_item};
    use futures::TryStreamExt;
    use modvault_remote::MockResolver;

    fn harness(count: u64, page_size: u32) -> Harness {
        let harness = Harness::with_settings(|settings| settings.sync.page_probe_size = page_size);
        for id in 1..=count {
            harness.resolver.upsert(packaged_item(id));
        }
        harness
    }

    async fn ids(harness: &Harness, cancel: &CancellationToken) -> Result<Vec<u64>> {
        let items: Vec<ModMetadata> = items(&harness.ctx, cancel).try_collect().await?;
        Ok(items.into_iter().map(|item| item.id).collect())
    }

    #[tokio::test]
    async fn test_pages_through_everything() {
        let harness = harness(7, 3);
        let ids = ids(&harness, &CancellationToken::new()).await.unwrap();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7]);
        // The probe page is reused as page one.
        assert_eq!(harness.resolver.query_calls(), 3);
    }

    #[tokio::test]
    async fn test_empty_catalog() {
        let harness = harness(0, 3);
        assert!(ids(&harness, &CancellationToken::new()).await.unwrap().is_empty());
        assert_eq!(harness.resolver.query_calls(), 1);
    }

    #[tokio::test]
    async fn test_duplicates_are_yielded_once() {
        let catalog = MockResolver::new([1, 2, 2, 3].map(packaged_item));
        let harness = Harness::with_resolver(catalog, |settings| settings.sync.page_probe_size = 2);
        let ids = ids(&harness, &CancellationToken::new()).await.unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_overstated_total_pages_to_the_end() {
        let catalog = MockResolver::new((1..=4).map(packaged_item)).with_total(9);
        let harness = Harness::with_resolver(catalog, |settings| settings.sync.page_probe_size = 2);
        let ids = ids(&harness, &CancellationToken::new()).await.unwrap();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        // Five pages of two, the last three empty.
        assert_eq!(harness.resolver.query_calls(), 5);
    }

    #[tokio::test]
    async fn test_transient_page_failures_are_retried() {
        let harness = harness(4, 2);
        harness.resolver.fail_next_pages(2);
        let ids = ids(&harness, &CancellationToken::new()).await.unwrap();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(harness.resolver.query_calls(), 4);
    }

    #[tokio::test]
    async fn test_exhausted_page_is_fatal() {
        let harness = harness(4, 2);
        harness.resolver.fail_next_pages(3);
        let err = ids(&harness, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Pagination(1)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let harness = harness(4, 2);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = ids(&harness, &cancel).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
        assert_eq!(harness.resolver.query_calls(), 0);
    }
}
