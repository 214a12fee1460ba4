//! Known URLs that are answered with an empty body.

use std::collections::HashSet;

use bytes::Bytes;

use super::{ResourceFuture, ResourceHandler, ResourceLoader, ResourceRequest, ready};

/// Suppresses block-listed URLs without logging them.
///
/// Matching is exact on the full URL.
#[derive(Debug, Clone, Default)]
pub struct BlockListHandler {
    urls: HashSet<String>,
}

impl BlockListHandler {
    /// Block every URL in `urls`.
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `url` is blocked.
    pub fn blocks(&self, url: &str) -> bool {
        self.urls.contains(url)
    }
}

impl ResourceHandler for BlockListHandler {
    fn handle(&self, request: &ResourceRequest, next: &dyn ResourceLoader) -> Option<ResourceFuture> {
        if self.blocks(&request.url) {
            Some(ready(Bytes::new()))
        } else {
            next.fetch(request)
        }
    }
}
