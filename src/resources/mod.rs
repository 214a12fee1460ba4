//! Resource interceptor chain.
//!
//! Every subresource a document requests goes through one
//! [`ResourceLoader`]. The loader is built from an ordered list of
//! [`ResourceHandler`]s folded right-to-left over a terminal loader, so the
//! first handler in the list is consulted first and each one either answers
//! the request or passes it on:
//!
//! ```text
//! CountingLoader ─▶ BlobHandler ─▶ PlaceholderHandler ─▶ BlockListHandler ─▶ AppResourceLoader
//!   (tracks)        blob: URLs     .png/.jpg/.gif         empty body          assets / data: / network
//! ```
//!
//! | Type | Role |
//! |------|------|
//! | [`blobs::BlobHandler`] | In-memory `blob:` objects |
//! | [`placeholder::PlaceholderHandler`] | 1×1 images for cross-origin pictures |
//! | [`blocklist::BlockListHandler`] | Suppress known URLs silently |
//! | [`app::AppResourceLoader`] | Terminal: same-origin assets, `data:`, network |
//! | [`CountingLoader`] | Makes every accepted fetch a tracked operation |

pub mod app;
pub mod blobs;
pub mod blocklist;
pub mod data_url;
pub mod network;
pub mod placeholder;

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::error::Result;
use crate::tracker::{OperationGuard, SettlementTracker, TerminalEvent};

/// Pending response body.
pub type ResourceFuture = BoxFuture<'static, Result<Bytes>>;

/// What kind of element asked for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceKind {
    /// `<script src>`.
    Script,
    /// `<link rel="stylesheet">`.
    Stylesheet,
    /// `<img>` and image decoding.
    Image,
    /// `<iframe>`.
    Frame,
    /// Anything else.
    #[default]
    Other,
}

/// A subresource request issued by the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    /// Absolute URL.
    pub url: String,
    /// Requesting element kind.
    pub kind: ResourceKind,
    /// URL of the requesting document.
    pub referrer: Option<String>,
}

impl ResourceRequest {
    /// A request of kind [`ResourceKind::Other`].
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: ResourceKind::Other,
            referrer: None,
        }
    }

    /// Set the requesting element kind.
    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Something that can satisfy resource requests.
///
/// Returning `None` means the resource is deliberately not loaded (the
/// document sees neither success nor failure).
pub trait ResourceLoader: Send + Sync {
    /// Fetch `request`.
    fn fetch(&self, request: &ResourceRequest) -> Option<ResourceFuture>;
}

/// One link of the chain.
pub trait ResourceHandler: Send + Sync {
    /// Answer `request`, or delegate to `next`.
    fn handle(&self, request: &ResourceRequest, next: &dyn ResourceLoader) -> Option<ResourceFuture>;
}

impl<F> ResourceHandler for F
where
    F: Fn(&ResourceRequest, &dyn ResourceLoader) -> Option<ResourceFuture> + Send + Sync,
{
    fn handle(&self, request: &ResourceRequest, next: &dyn ResourceLoader) -> Option<ResourceFuture> {
        self(request, next)
    }
}

/// A handler decorating an inner loader.
pub struct Layered {
    handler: Arc<dyn ResourceHandler>,
    inner: Arc<dyn ResourceLoader>,
}

impl Layered {
    /// Put `handler` in front of `inner`.
    pub fn new(handler: Arc<dyn ResourceHandler>, inner: Arc<dyn ResourceLoader>) -> Self {
        Self { handler, inner }
    }
}

impl ResourceLoader for Layered {
    fn fetch(&self, request: &ResourceRequest) -> Option<ResourceFuture> {
        self.handler.handle(request, self.inner.as_ref())
    }
}

/// Fold `handlers` right-to-left over `terminal`.
///
/// The first handler ends up outermost and therefore sees every request
/// first.
pub fn chain(
    handlers: impl IntoIterator<Item = Arc<dyn ResourceHandler>, IntoIter: DoubleEndedIterator>,
    terminal: Arc<dyn ResourceLoader>,
) -> Arc<dyn ResourceLoader> {
    handlers
        .into_iter()
        .rev()
        .fold(terminal, |inner, handler| Arc::new(Layered::new(handler, inner)))
}

/// Immediately-ready response.
pub fn ready(body: impl Into<Bytes>) -> ResourceFuture {
    let body = body.into();
    Box::pin(async move { Ok(body) })
}

/// Wraps a loader so every accepted fetch is a tracked operation.
///
/// The operation begins synchronously inside `fetch` and ends when the
/// response future is dropped, with the outcome it completed with. A caller
/// that polls the response through `&mut` and drops it after handing the
/// body to page code keeps the load counted while that code runs.
pub struct CountingLoader {
    inner: Arc<dyn ResourceLoader>,
    tracker: Arc<SettlementTracker>,
}

impl CountingLoader {
    /// Track fetches of `inner` on `tracker`.
    pub fn new(inner: Arc<dyn ResourceLoader>, tracker: Arc<SettlementTracker>) -> Self {
        Self { inner, tracker }
    }
}

impl ResourceLoader for CountingLoader {
    fn fetch(&self, request: &ResourceRequest) -> Option<ResourceFuture> {
        let response = self.inner.fetch(request)?;
        let guard = self.tracker.begin(format!("Resource {}", request.url));
        Some(Box::pin(CountedResponse {
            response,
            guard: Some(guard),
            outcome: None,
        }))
    }
}

/// Response whose tracked operation ends on drop.
struct CountedResponse {
    response: ResourceFuture,
    guard: Option<OperationGuard>,
    outcome: Option<TerminalEvent>,
}

impl Future for CountedResponse {
    type Output = Result<Bytes>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let result = ready!(this.response.as_mut().poll(cx));
        this.outcome = Some(if result.is_ok() {
            TerminalEvent::Success
        } else {
            TerminalEvent::Error
        });
        Poll::Ready(result)
    }
}

impl Drop for CountedResponse {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.finish(self.outcome.unwrap_or(TerminalEvent::Cancelled));
        }
    }
}

impl fmt::Debug for CountingLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingLoader")
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::error::RenderError;

    struct Echo;

    impl ResourceLoader for Echo {
        fn fetch(&self, request: &ResourceRequest) -> Option<ResourceFuture> {
            Some(ready(format!("network:{}", request.url)))
        }
    }

    fn recording(name: &'static str, seen: Arc<Mutex<Vec<&'static str>>>, answers: &'static str) -> Arc<dyn ResourceHandler> {
        Arc::new(move |request: &ResourceRequest, next: &dyn ResourceLoader| {
            seen.lock().unwrap().push(name);
            if request.url.ends_with(answers) {
                Some(ready(name))
            } else {
                next.fetch(request)
            }
        })
    }

    #[tokio::test]
    async fn test_handlers_consulted_in_declared_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let loader = chain(
            vec![
                recording("first", seen.clone(), ".a"),
                recording("second", seen.clone(), ".b"),
            ],
            Arc::new(Echo),
        );

        let body = loader.fetch(&ResourceRequest::new("x.b")).unwrap().await.unwrap();
        assert_eq!(body, Bytes::from("second"));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);

        seen.lock().unwrap().clear();
        let body = loader.fetch(&ResourceRequest::new("x.a")).unwrap().await.unwrap();
        assert_eq!(body, Bytes::from("first"));
        assert_eq!(*seen.lock().unwrap(), vec!["first"], "later handlers never see answered requests");

        let body = loader.fetch(&ResourceRequest::new("x.c")).unwrap().await.unwrap();
        assert_eq!(body, Bytes::from("network:x.c"));
    }

    #[tokio::test]
    async fn test_counting_loader_tracks_until_complete() {
        let tracker = Arc::new(SettlementTracker::new());
        let (tx, rx) = tokio::sync::oneshot::channel::<Bytes>();
        let rx = Mutex::new(Some(rx));
        let slow: Arc<dyn ResourceHandler> = Arc::new(move |_: &ResourceRequest, _: &dyn ResourceLoader| {
            let rx = rx.lock().unwrap().take()?;
            Some(Box::pin(async move { rx.await.map_err(|e| RenderError::fetch("slow", e)) }) as ResourceFuture)
        });
        let loader = CountingLoader::new(chain(vec![slow], Arc::new(Echo)), tracker.clone());

        let response = loader.fetch(&ResourceRequest::new("slow")).unwrap();
        assert_eq!(tracker.pending(), 1, "tracked as soon as fetch returns");

        tx.send(Bytes::from_static(b"done")).unwrap();
        assert_eq!(response.await.unwrap(), Bytes::from_static(b"done"));
        assert_eq!(tracker.pending(), 0);
    }

    #[tokio::test]
    async fn test_completed_response_counts_until_dropped() {
        let tracker = Arc::new(SettlementTracker::new());
        let loader = CountingLoader::new(Arc::new(Echo), tracker.clone());

        let mut response = loader.fetch(&ResourceRequest::new("held")).unwrap();
        let body = (&mut response).await.unwrap();
        assert_eq!(body, Bytes::from("network:held"));
        assert_eq!(tracker.pending(), 1, "handler of the body still runs under the load");

        drop(response);
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_counting_loader_ignores_unloaded_resources() {
        let tracker = Arc::new(SettlementTracker::new());
        let skip: Arc<dyn ResourceHandler> = Arc::new(|_: &ResourceRequest, _: &dyn ResourceLoader| None);
        let loader = CountingLoader::new(chain(vec![skip], Arc::new(Echo)), tracker.clone());
        assert!(loader.fetch(&ResourceRequest::new("anything")).is_none());
        assert_eq!(tracker.pending(), 0);
        assert_eq!(tracker.started(), 0);
    }

    #[test]
    fn test_dropped_response_releases_tracker() {
        let tracker = Arc::new(SettlementTracker::new());
        let loader = CountingLoader::new(Arc::new(Echo), tracker.clone());
        let response = loader.fetch(&ResourceRequest::new("dropped")).unwrap();
        assert_eq!(tracker.pending(), 1);
        drop(response);
        assert_eq!(tracker.pending(), 0);
    }
}
