//! Last-resort network access for the terminal loader.

use std::sync::Arc;

use super::{ResourceFuture, ResourceRequest};
use crate::error::RenderError;

/// Fetches resources that nothing else in the chain recognised.
pub trait NetworkFetcher: Send + Sync {
    /// Fetch `request` from the network.
    fn fetch(&self, request: &ResourceRequest) -> ResourceFuture;
}

/// Refuses every request.
///
/// The default when the `http-fetch` feature is disabled, and the usual
/// choice for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNetwork;

impl NetworkFetcher for NoNetwork {
    fn fetch(&self, request: &ResourceRequest) -> ResourceFuture {
        let url = request.url.clone();
        Box::pin(async move { Err(RenderError::fetch(url, "network access disabled")) })
    }
}

/// `GET`s resources over HTTP(S) with `reqwest`.
#[cfg(feature = "http-fetch")]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "http-fetch")]
impl HttpFetcher {
    /// Create a fetcher sending `user_agent`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Configuration`] if the HTTP client cannot be
    /// built (for example when no TLS backend is available).
    pub fn new(user_agent: &str) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| RenderError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http-fetch")]
impl NetworkFetcher for HttpFetcher {
    fn fetch(&self, request: &ResourceRequest) -> ResourceFuture {
        let client = self.client.clone();
        let url = request.url.clone();
        Box::pin(async move {
            let response = client
                .get(&url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| RenderError::fetch(&url, e))?;
            response.bytes().await.map_err(|e| RenderError::fetch(&url, e))
        })
    }
}

/// The fetcher used when none is configured.
pub fn default_fetcher() -> Arc<dyn NetworkFetcher> {
    #[cfg(feature = "http-fetch")]
    {
        match HttpFetcher::new(concat!("spa-prerender/", env!("CARGO_PKG_VERSION"))) {
            Ok(fetcher) => return Arc::new(fetcher),
            Err(e) => log::warn!("{}; falling back to no network", e),
        }
    }
    Arc::new(NoNetwork)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_network_refuses() {
        let err = NoNetwork
            .fetch(&ResourceRequest::new("https://example.com/app.js"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::ResourceFetch { ref url, .. } if url == "https://example.com/app.js"));
    }
}
