//! The render scheduler.
//!
//! [`Renderer`] keeps one [`Environment`] per client identity and runs
//! render jobs against it one at a time, in arrival order.
//!
//! # Environment lifecycle
//!
//! ```text
//! absent ──first render──▶ constructing ──ok──▶ ready ──close()──▶ torn down
//!                               │
//!                               └──error──▶ absent (next render retries)
//! ```
//!
//! The slot for an identity is inserted synchronously on first sight, so
//! concurrent first renders for the same identity share one construction.
//!
//! # Render job
//!
//! 1. Join the environment's FIFO queue. A failed earlier job never affects
//!    later ones.
//! 2. Attach the caller's log for the duration of the job.
//! 3. Navigate if the current location differs from `{base_url}#{path}`.
//! 4. [`settle`], bounded by [`RendererConfig::render_timeout`] and the
//!    caller's [`AbortSignal`].
//! 5. Serialize and [`finalize`](crate::markup::finalize) the markup.
//!
//! Different identities never wait for each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;

use crate::abort::AbortSignal;
use crate::config::RendererConfig;
use crate::environment::{Blueprint, Environment};
use crate::error::{RenderError, Result};
use crate::logging::RenderLog;
use crate::markup;
use crate::middleware::App;
use crate::resources::app::AssetSource;
use crate::resources::network::{NetworkFetcher, default_fetcher};
use crate::runtime::RuntimeFactory;
use crate::settle::settle;
use crate::stats::RendererStats;

type Slot = Arc<OnceCell<Arc<Environment>>>;

/// `None` once the renderer is closed.
type Environments = Option<HashMap<String, Slot>>;

/// Renders application paths to static markup.
///
/// Create one with [`Renderer::builder`], share it behind an `Arc`, and call
/// [`close`](Self::close) before dropping it.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use spa_prerender::{LogCrateSink, Renderer};
/// use spa_prerender::resources::app::DirectoryAssets;
///
/// let renderer = Renderer::builder()
///     .factory(Arc::new(MyEngineFactory))
///     .assets(Arc::new(DirectoryAssets::new("build/web")))
///     .build()?;
///
/// let html = renderer
///     .render(Arc::new(LogCrateSink), "Mozilla/5.0 (X11; Linux x86_64)", "/", None)
///     .await?;
///
/// renderer.close().await?;
/// ```
pub struct Renderer {
    blueprint: Blueprint,
    environments: Mutex<Environments>,
    constructions: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicUsize,
}

impl Renderer {
    /// Start building a renderer.
    pub fn builder() -> RendererBuilder {
        RendererBuilder::new()
    }

    /// The configuration this renderer was built with.
    pub fn config(&self) -> &RendererConfig {
        &self.blueprint.config
    }

    /// Render `path` for the client identified by `identity`.
    ///
    /// `log` receives this job's render-scoped messages. `signal` cancels
    /// the wait for the page to settle; work already started in the
    /// environment keeps running and the next render proceeds normally.
    ///
    /// # Errors
    ///
    /// - [`RenderError::Closed`] after [`close`](Self::close)
    /// - [`RenderError::Aborted`] if `signal` fired
    /// - [`RenderError::Timeout`] if the page did not settle in time
    /// - construction, navigation and resource errors
    pub async fn render(
        &self,
        log: Arc<dyn RenderLog>,
        identity: &str,
        path: &str,
        signal: Option<&AbortSignal>,
    ) -> Result<String> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let result = self.run_job(log, identity, path, signal).await;
        match &result {
            Ok(markup) => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
                log::debug!("Rendered '{}' for '{}' ({} bytes)", path, identity, markup.len());
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("Render of '{}' for '{}' failed: {}", path, identity, e);
            }
        }
        result
    }

    async fn run_job(
        &self,
        log: Arc<dyn RenderLog>,
        identity: &str,
        path: &str,
        signal: Option<&AbortSignal>,
    ) -> Result<String> {
        let environment = self.environment(identity, path).await?;

        let mut session = environment.session.lock().await;
        let runtime = session.runtime.clone().ok_or(RenderError::Closed)?;
        let _attached = environment.log.attach(log);

        let location = self.blueprint.config.location_for(path);
        if runtime.location() != location {
            log::trace!("Navigating '{}' to {}", identity, location);
            runtime.navigate(&location)?;
        }

        let settling = settle(&*runtime, &environment.tracker, signal);
        let settlement = match self.blueprint.config.render_timeout {
            Some(limit) => tokio::time::timeout(limit, settling)
                .await
                .map_err(|_| RenderError::Timeout(limit))??,
            None => settling.await?,
        };
        log::trace!(
            "'{}' settled after {} passes ({} waited)",
            path,
            settlement.passes,
            settlement.waited
        );

        let markup = markup::finalize(&runtime.serialize(), &runtime.deferred_scripts());
        session.renders += 1;
        Ok(markup)
    }

    /// The environment for `identity`, constructing it on first use.
    async fn environment(&self, identity: &str, path: &str) -> Result<Arc<Environment>> {
        let slot = {
            let mut environments = self.lock();
            let map = environments.as_mut().ok_or(RenderError::Closed)?;
            Arc::clone(map.entry(identity.to_string()).or_default())
        };

        let environment = slot
            .get_or_try_init(|| async {
                self.constructions.fetch_add(1, Ordering::Relaxed);
                Environment::construct(&self.blueprint, identity, path)
                    .await
                    .map(Arc::new)
            })
            .await?;

        // close() may have run while we were constructing.
        if self.is_closed() {
            environment.teardown().await;
            return Err(RenderError::Closed);
        }
        Ok(Arc::clone(environment))
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    /// Current statistics.
    pub fn stats(&self) -> RendererStats {
        let environments = self
            .lock()
            .as_ref()
            .map_or(0, |map| map.values().filter(|slot| slot.initialized()).count());
        RendererStats {
            environments,
            constructions: self.constructions.load(Ordering::Relaxed),
            renders_succeeded: self.succeeded.load(Ordering::Relaxed),
            renders_failed: self.failed.load(Ordering::Relaxed),
            renders_in_flight: self.in_flight.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting renders, wait for queued ones, and tear every
    /// environment down.
    ///
    /// Renders started after this call fail with [`RenderError::Closed`].
    /// Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let Some(slots) = self.lock().take() else {
            log::debug!("Renderer already closed");
            return Ok(());
        };

        let ready: Vec<Arc<Environment>> = slots.values().filter_map(|slot| slot.get().cloned()).collect();
        log::info!("Closing renderer: waiting for {} environments", ready.len());

        futures::future::join_all(ready.iter().map(|environment| environment.teardown())).await;

        log::info!("Renderer closed - {}", self.stats());
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Environments> {
        self.environments.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Renderer {
    /// Close environments that are not in use if [`close`](Self::close)
    /// was never awaited.
    fn drop(&mut self) {
        let Some(slots) = self.lock().take() else {
            return;
        };
        log::warn!("Renderer dropped without close() - tearing down idle environments");
        for environment in slots.values().filter_map(|slot| slot.get()) {
            if !environment.try_teardown() {
                log::warn!("Environment for '{}' is busy and was not closed", environment.identity);
            }
        }
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("config", &self.blueprint.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// RendererBuilder
// ============================================================================

/// Builder for constructing a [`Renderer`] with validation.
///
/// A runtime factory and an asset source are required; everything else has
/// defaults.
///
/// # Example
///
/// ```rust,ignore
/// let renderer = RendererBuilder::new()
///     .config(RendererConfigBuilder::new().base_url("https://app.example.com/").build()?)
///     .factory(Arc::new(MyEngineFactory))
///     .assets(Arc::new(DirectoryAssets::new("build/web")))
///     .app(App::new().with(MyModule))
///     .build()?;
/// ```
pub struct RendererBuilder {
    config: Option<RendererConfig>,
    factory: Option<Arc<dyn RuntimeFactory>>,
    assets: Option<Arc<dyn AssetSource>>,
    network: Option<Arc<dyn NetworkFetcher>>,
    app: App,
}

impl RendererBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: None,
            factory: None,
            assets: None,
            network: None,
            app: App::new(),
        }
    }

    /// Set the configuration (default: [`RendererConfig::default`]).
    pub fn config(mut self, config: RendererConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the runtime factory (required).
    pub fn factory(mut self, factory: Arc<dyn RuntimeFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Set the application asset source (required).
    pub fn assets(mut self, assets: Arc<dyn AssetSource>) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Set the fetcher for resources outside the application.
    ///
    /// Defaults to an HTTP client with the `http-fetch` feature and to
    /// refusing every request without it.
    pub fn network(mut self, network: Arc<dyn NetworkFetcher>) -> Self {
        self.network = Some(network);
        self
    }

    /// Add modules applied after the built-in ones.
    pub fn app(mut self, app: App) -> Self {
        self.app = self.app.then(app);
        self
    }

    /// Build the renderer.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Configuration`] if no factory or asset source
    /// was provided.
    pub fn build(self) -> Result<Renderer> {
        let config = self.config.unwrap_or_default();
        let factory = self
            .factory
            .ok_or_else(|| RenderError::Configuration("No runtime factory provided".to_string()))?;
        let assets = self
            .assets
            .ok_or_else(|| RenderError::Configuration("No asset source provided".to_string()))?;
        let network = self.network.unwrap_or_else(default_fetcher);

        log::info!(
            "Building renderer for {} (modules: {:?})",
            config.base_url,
            self.app.names()
        );

        Ok(Renderer {
            blueprint: Blueprint {
                config,
                factory,
                assets,
                network,
                app: self.app,
            },
            environments: Mutex::new(Some(HashMap::new())),
            constructions: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        })
    }
}

impl Default for RendererBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::app::MemoryAssets;
    use crate::runtime::mock::MockRuntimeFactory;

    /// Verifies that the builder requires a factory.
    #[test]
    fn test_builder_requires_factory() {
        let result = Renderer::builder()
            .assets(Arc::new(MemoryAssets::new()))
            .build();
        assert!(matches!(result, Err(RenderError::Configuration(ref m)) if m.contains("factory")));
    }

    /// Verifies that the builder requires an asset source.
    #[test]
    fn test_builder_requires_assets() {
        let result = Renderer::builder()
            .factory(Arc::new(MockRuntimeFactory::new()))
            .build();
        assert!(matches!(result, Err(RenderError::Configuration(ref m)) if m.contains("asset")));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let renderer = Renderer::builder()
            .factory(Arc::new(MockRuntimeFactory::new()))
            .assets(Arc::new(MemoryAssets::new()))
            .build()
            .unwrap();
        assert!(!renderer.is_closed());
        renderer.close().await.unwrap();
        renderer.close().await.unwrap();
        assert!(renderer.is_closed());
        assert_eq!(renderer.stats().environments, 0);
    }

    #[tokio::test]
    async fn test_missing_index_document_is_retried() {
        let factory = Arc::new(MockRuntimeFactory::new());
        let renderer = Renderer::builder()
            .factory(factory.clone())
            .assets(Arc::new(MemoryAssets::new()))
            .build()
            .unwrap();

        for _ in 0..2 {
            let err = renderer
                .render(Arc::new(crate::logging::MemoryLog::new()), "agent", "/", None)
                .await
                .unwrap_err();
            assert!(matches!(err, RenderError::EnvironmentCreation(_)), "got {err:?}");
        }

        let stats = renderer.stats();
        assert_eq!(stats.constructions, 2, "failed construction leaves the slot empty");
        assert_eq!(stats.environments, 0);
        assert_eq!(stats.renders_failed, 2);
        assert_eq!(factory.created(), 0);
        renderer.close().await.unwrap();
    }
}
