use crate::buffer::PackageBuffer;
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Number of leading bytes fetched when a preview's type has to be sniffed.
pub const SNIFF_LEN: u64 = 512;

/// Transport for direct package downloads and preview images.
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Download a whole package into a local buffer.
    ///
    /// Fails with [`Timeout`](crate::error::ErrorKind::Timeout) once `timeout`
    /// elapses and with [`Cancelled`](crate::error::ErrorKind::Cancelled) as
    /// soon as `cancel` fires.
    async fn fetch(
        &self,
        url: &str,
        declared_size: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PackageBuffer>;

    /// Detect the media type of a remote resource, without downloading all
    /// of it. `Ok(None)` means it couldn't be determined.
    async fn probe_media_type(&self, url: &str) -> Result<Option<String>>;
}

/// Race `work` against a timeout and a cancellation token.
pub async fn bounded<T>(
    work: impl Future<Output = Result<T>>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T> {
    use crate::error::ErrorKind;
    tokio::select! {
        () = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
        result = tokio::time::timeout(timeout, work) => match result {
            Ok(result) => result,
            Err(_elapsed) => exn::bail!(ErrorKind::Timeout),
        },
    }
}

#[cfg(feature = "http")]
pub use self::http::HttpPackageSource;

#[cfg(feature = "http")]
mod http {
    use super::{PackageSource, SNIFF_LEN, bounded};
    use crate::buffer::{BufferPool, PackageBuffer};
    use crate::error::{ErrorKind, Result};
    use async_trait::async_trait;
    use exn::ResultExt;
    use reqwest::header::{CONTENT_TYPE, RANGE};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Generic content types that say nothing about the actual payload.
    const OPAQUE_TYPES: [&str; 2] = ["application/octet-stream", "binary/octet-stream"];

    /// Plain HTTP(S) package source.
    pub struct HttpPackageSource {
        client: reqwest::Client,
        pool: Arc<BufferPool>,
        spool_threshold: u64,
    }

    impl HttpPackageSource {
        pub fn new(pool: Arc<BufferPool>, spool_threshold: u64) -> Result<Self> {
            let client = reqwest::Client::builder()
                .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
                .build()
                .or_raise(|| ErrorKind::Connection)?;
            Ok(Self { client, pool, spool_threshold })
        }

        async fn download(&self, url: &str, declared_size: u64) -> Result<PackageBuffer> {
            let mut response = self.client.get(url).send().await.map_err(ErrorKind::transport)?;
            let status = response.status();
            if !status.is_success() {
                exn::bail!(ErrorKind::Status(status.as_u16()));
            }
            let size = response.content_length().unwrap_or(declared_size);
            let mut buffer =
                PackageBuffer::new(size, self.spool_threshold, &self.pool).or_raise(|| ErrorKind::Spool)?;
            while let Some(chunk) = response.chunk().await.map_err(ErrorKind::transport)? {
                buffer.append(&chunk).or_raise(|| ErrorKind::Spool)?;
            }
            tracing::debug!(url, bytes = buffer.len(), spooled = buffer.is_spooled(), "Downloaded package");
            Ok(buffer)
        }

        async fn head_media_type(&self, url: &str) -> Result<Option<String>> {
            let response = self.client.head(url).send().await.map_err(ErrorKind::transport)?;
            if !response.status().is_success() {
                return Ok(None);
            }
            let media_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(';').next())
                .map(|value| value.trim().to_ascii_lowercase())
                .filter(|value| !value.is_empty() && !OPAQUE_TYPES.contains(&value.as_str()));
            Ok(media_type)
        }

        async fn sniff_media_type(&self, url: &str) -> Result<Option<String>> {
            let response = self
                .client
                .get(url)
                .header(RANGE, format!("bytes=0-{}", SNIFF_LEN - 1))
                .send()
                .await
                .map_err(ErrorKind::transport)?;
            let status = response.status();
            if !status.is_success() {
                exn::bail!(ErrorKind::Status(status.as_u16()));
            }
            let head = response.bytes().await.map_err(ErrorKind::transport)?;
            Ok(infer::get(&head).map(|kind| kind.mime_type().to_string()))
        }
    }

    #[async_trait]
    impl PackageSource for HttpPackageSource {
        #[tracing::instrument(level = "debug", skip(self, cancel))]
        async fn fetch(
            &self,
            url: &str,
            declared_size: u64,
            timeout: Duration,
            cancel: &CancellationToken,
        ) -> Result<PackageBuffer> {
            bounded(self.download(url, declared_size), timeout, cancel).await
        }

        async fn probe_media_type(&self, url: &str) -> Result<Option<String>> {
            // Some CDNs refuse HEAD or answer it with a generic type; only
            // then is it worth pulling the first bytes down.
            match self.head_media_type(url).await {
                Ok(Some(media_type)) => return Ok(Some(media_type)),
                Ok(None) => {},
                Err(e) => tracing::debug!(url, error = ?e, "HEAD request failed, sniffing instead"),
            }
            self.sniff_media_type(url).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let cancel = CancellationToken::new();
        let work = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, crate::error::Error>(())
        };
        let err = bounded(work, Duration::from_secs(10), &cancel).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_bounded_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = bounded(std::future::pending::<Result<()>>(), Duration::from_secs(10), &cancel).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let cancel = CancellationToken::new();
        let value = bounded(async { Ok::<_, crate::error::Error>(7) }, Duration::from_secs(1), &cancel).await.unwrap();
        assert_eq!(value, 7);
    }
}
