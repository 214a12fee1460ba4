//! In-memory objects behind `blob:` URLs.
//!
//! Page code calls `URL.createObjectURL` with generated bytes (decoded
//! images, fonts) and later requests the returned URL like any other
//! resource. [`BlobStore`] keeps those bytes per environment and
//! [`BlobHandler`] answers for them at the front of the resource chain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;

use super::{ResourceFuture, ResourceHandler, ResourceLoader, ResourceRequest, ready};
use crate::middleware::Module;
use crate::runtime::{InitHook, WindowSetup};

/// Object URL registry for one environment.
#[derive(Debug)]
pub struct BlobStore {
    base_url: String,
    counter: AtomicU64,
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl BlobStore {
    /// Create a store minting URLs of the form `blob:{base_url}{n}`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            counter: AtomicU64::new(0),
            blobs: Mutex::new(HashMap::new()),
        }
    }

    /// Store `bytes` and return its new URL.
    pub fn register(&self, bytes: impl Into<Bytes>) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let url = format!("blob:{}{}", self.base_url, n);
        self.lock().insert(url.clone(), bytes.into());
        log::trace!("Registered {}", url);
        url
    }

    /// Forget `url`. Returns whether it was registered.
    pub fn revoke(&self, url: &str) -> bool {
        self.lock().remove(url).is_some()
    }

    /// Bytes registered under `url`.
    pub fn get(&self, url: &str) -> Option<Bytes> {
        self.lock().get(url).cloned()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no objects are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Bytes>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Answers requests for registered object URLs.
#[derive(Debug, Clone)]
pub struct BlobHandler {
    store: Arc<BlobStore>,
}

impl BlobHandler {
    /// Serve objects from `store`.
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self { store }
    }
}

impl ResourceHandler for BlobHandler {
    fn handle(&self, request: &ResourceRequest, next: &dyn ResourceLoader) -> Option<ResourceFuture> {
        match self.store.get(&request.url) {
            Some(bytes) => Some(ready(bytes)),
            None => next.fetch(request),
        }
    }
}

/// Module giving every environment its own [`BlobStore`].
///
/// Installs the store on the window (as `object_urls`) and puts a
/// [`BlobHandler`] in front of the resource chain.
#[derive(Debug, Clone)]
pub struct BlobModule {
    base_url: String,
}

impl BlobModule {
    /// Mint object URLs under `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Module for BlobModule {
    type State = BlobStore;

    fn name(&self) -> &str {
        "blobs"
    }

    fn create_state(&self) -> BlobStore {
        BlobStore::new(self.base_url.clone())
    }

    fn resources(&self, state: &Arc<BlobStore>) -> Option<Arc<dyn ResourceHandler>> {
        Some(Arc::new(BlobHandler::new(Arc::clone(state))))
    }

    fn init(&self, state: &Arc<BlobStore>) -> Option<InitHook> {
        let store = Arc::clone(state);
        Some(Arc::new(move |window: &mut WindowSetup| {
            window.object_urls = Some(Arc::clone(&store));
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Miss;

    impl ResourceLoader for Miss {
        fn fetch(&self, _request: &ResourceRequest) -> Option<ResourceFuture> {
            None
        }
    }

    #[test]
    fn test_register_mints_sequential_urls() {
        let store = BlobStore::new("http://localhost/");
        let first = store.register(&b"one"[..]);
        let second = store.register(&b"two"[..]);
        assert_eq!(first, "blob:http://localhost/1");
        assert_eq!(second, "blob:http://localhost/2");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_revoke() {
        let store = BlobStore::new("http://localhost/");
        let url = store.register(Bytes::from_static(b"x"));
        assert!(store.revoke(&url));
        assert!(!store.revoke(&url));
        assert!(store.get(&url).is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_handler_serves_registered_and_delegates_rest() {
        let store = Arc::new(BlobStore::new("http://localhost/"));
        let url = store.register(Bytes::from_static(b"payload"));
        let handler = BlobHandler::new(store);

        let body = handler
            .handle(&ResourceRequest::new(url), &Miss)
            .expect("registered blob is served")
            .await
            .unwrap();
        assert_eq!(&body[..], b"payload");

        assert!(handler
            .handle(&ResourceRequest::new("blob:http://localhost/99"), &Miss)
            .is_none());
    }
}
