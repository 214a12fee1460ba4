//! Terminal loader: the application's own assets.
//!
//! | URL | Served from |
//! |-----|-------------|
//! | `{base_url}{name}` | [`AssetSource::fetch`] with `name` |
//! | `data:...` | decoded inline |
//! | anything else | logged as unexpected, then [`NetworkFetcher`] |

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use super::network::NetworkFetcher;
use super::{ResourceFuture, ResourceLoader, ResourceRequest, data_url};
use crate::error::RenderError;
use crate::logging::RenderLog;

// ============================================================================
// AssetSource
// ============================================================================

/// Provider of the compiled application bundle.
///
/// Names are paths relative to the base URL, e.g. `index.html` or
/// `assets/fonts/Roboto.ttf`.
pub trait AssetSource: Send + Sync {
    /// Read asset `name`.
    fn fetch(&self, name: &str) -> ResourceFuture;
}

impl<F> AssetSource for F
where
    F: Fn(&str) -> ResourceFuture + Send + Sync,
{
    fn fetch(&self, name: &str) -> ResourceFuture {
        self(name)
    }
}

/// Assets read from a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    root: PathBuf,
}

impl DirectoryAssets {
    /// Serve files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory assets are read from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `name` under the root, refusing anything that escapes it.
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name.trim_start_matches('/'));
        relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
            .then(|| self.root.join(relative))
    }
}

impl AssetSource for DirectoryAssets {
    fn fetch(&self, name: &str) -> ResourceFuture {
        let name = name.to_string();
        let path = self.resolve(&name);
        Box::pin(async move {
            let path = path.ok_or_else(|| RenderError::fetch(&name, "path escapes asset root"))?;
            tokio::fs::read(&path)
                .await
                .map(Bytes::from)
                .map_err(|e| RenderError::fetch(&name, e))
        })
    }
}

/// Assets held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssets {
    files: HashMap<String, Bytes>,
}

impl MemoryAssets {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file.
    pub fn with(mut self, name: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        self.files.insert(name.into(), contents.into());
        self
    }
}

impl AssetSource for MemoryAssets {
    fn fetch(&self, name: &str) -> ResourceFuture {
        let found = self.files.get(name).cloned();
        let name = name.to_string();
        Box::pin(async move { found.ok_or_else(|| RenderError::fetch(name, "no such asset")) })
    }
}

// ============================================================================
// AppResourceLoader
// ============================================================================

/// Terminal link of the resource chain.
pub struct AppResourceLoader {
    base_url: String,
    assets: Arc<dyn AssetSource>,
    network: Arc<dyn NetworkFetcher>,
    log: Arc<dyn RenderLog>,
}

impl AppResourceLoader {
    /// Create a loader for the application served at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        assets: Arc<dyn AssetSource>,
        network: Arc<dyn NetworkFetcher>,
        log: Arc<dyn RenderLog>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            assets,
            network,
            log,
        }
    }

    /// Asset name for a same-origin URL.
    fn asset_name<'a>(&self, url: &'a str) -> Option<&'a str> {
        let name = url.strip_prefix(self.base_url.as_str())?;
        Some(name.split(['?', '#']).next().unwrap_or(name))
    }
}

impl ResourceLoader for AppResourceLoader {
    fn fetch(&self, request: &ResourceRequest) -> Option<ResourceFuture> {
        let url = request.url.as_str();
        self.log.trace(&format!("Fetching {}", url), None);

        if let Some(name) = self.asset_name(url) {
            return Some(self.assets.fetch(name));
        }
        if data_url::is_data_url(url) {
            let decoded = data_url::decode(url);
            return Some(Box::pin(async move { decoded }));
        }

        self.log
            .error(&format!("Unexpected server-side render resource: {}", url), None);
        Some(self.network.fetch(request))
    }
}
