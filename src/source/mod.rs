//! Back-to-source resource clients
//!
//! A [`SourceRegistry`] maps URL schemes to [`ResourceClient`]s. It is built
//! explicitly and handed to whoever needs source access; there is no
//! process-wide client table.
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = SourceRegistry::new();
//! registry.register("HTTP", Arc::new(MyHttpClient::default())).await;
//!
//! let length = registry
//!     .content_length("http://example.com/file", &Header::new(), None)
//!     .await?;
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Timeout applied to metadata calls when the caller gives none
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request headers sent to the source
pub type Header = HashMap<String, String>;

/// Validators (e.g. `Last-Modified`, `ETag`) describing a cached copy
pub type ExpireInfo = HashMap<String, String>;

/// Resource content as a stream of chunks
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Access to resources behind one URL scheme
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Content length of the resource; `-1` when the source does not say
    async fn content_length(&self, url: &str, header: &Header) -> Result<i64>;

    /// Whether the source serves byte ranges
    async fn is_support_range(&self, url: &str, header: &Header) -> Result<bool>;

    /// Whether a copy described by `expire_info` is out of date
    async fn is_expired(&self, url: &str, header: &Header, expire_info: &ExpireInfo)
        -> Result<bool>;

    async fn download(&self, url: &str, header: &Header) -> Result<ByteStream>;

    /// Download along with the validators of the downloaded copy
    async fn download_with_expire(
        &self,
        url: &str,
        header: &Header,
    ) -> Result<(ByteStream, ExpireInfo)>;

    async fn expire_info(&self, url: &str, header: &Header) -> Result<ExpireInfo>;
}

/// Scheme to client lookup
pub struct SourceRegistry {
    clients: RwLock<HashMap<String, Arc<dyn ResourceClient>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Register the client for a scheme, replacing any earlier one
    pub async fn register(&self, scheme: &str, client: Arc<dyn ResourceClient>) {
        let scheme = scheme.to_ascii_lowercase();
        tracing::debug!(scheme = %scheme, "Registered source client");
        self.clients.write().await.insert(scheme, client);
    }

    pub async fn unregister(&self, scheme: &str) -> Option<Arc<dyn ResourceClient>> {
        self.clients
            .write()
            .await
            .remove(&scheme.to_ascii_lowercase())
    }

    /// Registered schemes, sorted
    pub async fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<_> = self.clients.read().await.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Client responsible for a URL's scheme
    pub async fn client_for(&self, url: &str) -> Result<Arc<dyn ResourceClient>> {
        let parsed =
            url::Url::parse(url).map_err(|e| Error::other(format!("invalid url {url}: {e}")))?;

        self.clients
            .read()
            .await
            .get(parsed.scheme())
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("no source client for scheme {}", parsed.scheme()))
            })
    }

    pub async fn content_length(
        &self,
        url: &str,
        header: &Header,
        timeout: Option<Duration>,
    ) -> Result<i64> {
        let client = self.client_for(url).await?;
        with_timeout(timeout, client.content_length(url, header)).await
    }

    pub async fn is_support_range(
        &self,
        url: &str,
        header: &Header,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        let client = self.client_for(url).await?;
        with_timeout(timeout, client.is_support_range(url, header)).await
    }

    pub async fn is_expired(
        &self,
        url: &str,
        header: &Header,
        expire_info: &ExpireInfo,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        let client = self.client_for(url).await?;
        with_timeout(timeout, client.is_expired(url, header, expire_info)).await
    }

    pub async fn expire_info(
        &self,
        url: &str,
        header: &Header,
        timeout: Option<Duration>,
    ) -> Result<ExpireInfo> {
        let client = self.client_for(url).await?;
        with_timeout(timeout, client.expire_info(url, header)).await
    }

    pub async fn download(&self, url: &str, header: &Header) -> Result<ByteStream> {
        self.client_for(url).await?.download(url, header).await
    }

    pub async fn download_with_expire(
        &self,
        url: &str,
        header: &Header,
    ) -> Result<(ByteStream, ExpireInfo)> {
        self.client_for(url)
            .await?
            .download_with_expire(url, header)
            .await
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    let limit = timeout.unwrap_or(DEFAULT_TIMEOUT);
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| Error::Fetch(format!("source call timed out after {limit:?}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, StreamExt};

    struct StaticClient {
        body: &'static [u8],
        delay: Duration,
    }

    #[async_trait]
    impl ResourceClient for StaticClient {
        async fn content_length(&self, _url: &str, _header: &Header) -> Result<i64> {
            tokio::time::sleep(self.delay).await;
            Ok(self.body.len() as i64)
        }

        async fn is_support_range(&self, _url: &str, _header: &Header) -> Result<bool> {
            Ok(true)
        }

        async fn is_expired(
            &self,
            _url: &str,
            _header: &Header,
            expire_info: &ExpireInfo,
        ) -> Result<bool> {
            Ok(expire_info.get("ETag").map(String::as_str) != Some("v1"))
        }

        async fn download(&self, _url: &str, _header: &Header) -> Result<ByteStream> {
            Ok(stream::iter(vec![Ok(Bytes::from_static(self.body))]).boxed())
        }

        async fn download_with_expire(
            &self,
            url: &str,
            header: &Header,
        ) -> Result<(ByteStream, ExpireInfo)> {
            let body = self.download(url, header).await?;
            Ok((body, self.expire_info(url, header).await?))
        }

        async fn expire_info(&self, _url: &str, _header: &Header) -> Result<ExpireInfo> {
            Ok(HashMap::from([("ETag".to_string(), "v1".to_string())]))
        }
    }

    fn client(delay: Duration) -> Arc<dyn ResourceClient> {
        Arc::new(StaticClient {
            body: b"hello",
            delay,
        })
    }

    #[tokio::test]
    async fn test_scheme_lookup_is_case_insensitive() {
        let registry = SourceRegistry::new();
        registry.register("HTTP", client(Duration::ZERO)).await;

        assert_eq!(registry.schemes().await, vec!["http".to_string()]);
        let length = registry
            .content_length("http://example.com/a", &Header::new(), None)
            .await
            .unwrap();
        assert_eq!(length, 5);

        let expired = registry
            .is_expired(
                "HTTP://example.com/a",
                &Header::new(),
                &HashMap::from([("ETag".to_string(), "v1".to_string())]),
                None,
            )
            .await
            .unwrap();
        assert!(!expired);
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_not_found() {
        let registry = SourceRegistry::new();
        registry.register("http", client(Duration::ZERO)).await;

        let err = registry.client_for("oss://bucket/key").await.err().unwrap();
        assert!(matches!(err, Error::NotFound(_)));

        registry.unregister("HTTP").await;
        assert!(registry.client_for("http://example.com").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_applies() {
        let registry = SourceRegistry::new();
        registry.register("http", client(Duration::from_secs(30))).await;

        let err = registry
            .content_length("http://example.com/a", &Header::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));

        let length = registry
            .content_length(
                "http://example.com/a",
                &Header::new(),
                Some(Duration::from_secs(60)),
            )
            .await
            .unwrap();
        assert_eq!(length, 5);
    }

    #[tokio::test]
    async fn test_download_with_expire() {
        let registry = SourceRegistry::new();
        registry.register("http", client(Duration::ZERO)).await;

        let (mut body, info) = registry
            .download_with_expire("http://example.com/a", &Header::new())
            .await
            .unwrap();
        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(info.get("ETag").map(String::as_str), Some("v1"));
    }
}
