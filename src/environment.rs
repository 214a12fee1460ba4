//! One cached runtime per client identity.
//!
//! An [`Environment`] bundles everything that lives as long as the runtime:
//! its settlement tracker, its log proxy, and the session lock that queues
//! render jobs. Construction wires the pieces together in this order:
//!
//! ```text
//! index document ◀── AssetSource
//!        │
//! EnvironmentConfig { url: base#path, resources: AppResourceLoader, console: ConsoleBridge }
//!        │  App::config  (blobs, placeholder, blocklist, user modules)
//!        │  resources wrapped in CountingLoader
//!        │  init: module hooks, then viewport + localStorage + instrumentation
//!        ▼
//! RuntimeFactory::create
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::config::RendererConfig;
use crate::error::{RenderError, Result};
use crate::instrument;
use crate::logging::{ConsoleBridge, LogProxy, RenderLog};
use crate::middleware::{App, resource_module};
use crate::resources::CountingLoader;
use crate::resources::app::{AppResourceLoader, AssetSource};
use crate::resources::blobs::BlobModule;
use crate::resources::blocklist::BlockListHandler;
use crate::resources::network::NetworkFetcher;
use crate::resources::placeholder::PlaceholderHandler;
use crate::runtime::{EnvironmentConfig, InitHook, Runtime, RuntimeFactory, WindowSetup};
use crate::tracker::SettlementTracker;

/// Everything needed to construct environments.
pub(crate) struct Blueprint {
    pub(crate) config: RendererConfig,
    pub(crate) factory: Arc<dyn RuntimeFactory>,
    pub(crate) assets: Arc<dyn AssetSource>,
    pub(crate) network: Arc<dyn NetworkFetcher>,
    pub(crate) app: App,
}

impl Blueprint {
    /// Built-in modules followed by the user's.
    fn modules(&self) -> App {
        let base_url = self.config.base_url.as_str();
        App::new()
            .with(BlobModule::new(base_url))
            .with(resource_module("placeholder", PlaceholderHandler::new(base_url)))
            .with(resource_module(
                "blocklist",
                BlockListHandler::new(self.config.block_list.iter().cloned()),
            ))
            .then(self.app.clone())
    }
}

/// Mutable per-environment state, guarded by the FIFO job queue.
pub(crate) struct Session {
    /// `None` once torn down.
    pub(crate) runtime: Option<Arc<dyn Runtime>>,
    pub(crate) renders: u64,
}

/// A constructed, cached runtime for one client identity.
pub(crate) struct Environment {
    pub(crate) identity: String,
    pub(crate) tracker: Arc<SettlementTracker>,
    pub(crate) log: Arc<LogProxy>,
    pub(crate) session: Mutex<Session>,
    created_at: Instant,
}

impl Environment {
    /// Build the runtime for `identity`, initially showing `path`.
    pub(crate) async fn construct(blueprint: &Blueprint, identity: &str, path: &str) -> Result<Environment> {
        let started = Instant::now();
        let config = &blueprint.config;
        log::debug!("Constructing environment for '{}' at '{}'", identity, path);

        let tracker = Arc::new(SettlementTracker::new());
        let log = Arc::new(LogProxy::new());
        let page_log: Arc<dyn RenderLog> = log.clone();

        let document = blueprint
            .assets
            .fetch(&config.index_document)
            .await
            .map_err(|e| {
                RenderError::EnvironmentCreation(format!("Failed to load {}: {}", config.index_document, e))
            })?;
        let document = String::from_utf8_lossy(&document).into_owned();

        let terminal = AppResourceLoader::new(
            config.base_url.clone(),
            Arc::clone(&blueprint.assets),
            Arc::clone(&blueprint.network),
            Arc::clone(&page_log),
        );
        let mut base = EnvironmentConfig::new(identity, config.location_for(path), Arc::new(terminal));
        base.console = Arc::new(ConsoleBridge::new(Arc::clone(&page_log)));

        let mut env_config = blueprint.modules().config(base);
        env_config.resources = Arc::new(CountingLoader::new(env_config.resources, Arc::clone(&tracker)));
        env_config.init = Some(instrumented_init(
            env_config.init.take(),
            config,
            config.viewport_for(identity),
            &tracker,
            page_log,
        ));

        let runtime = blueprint.factory.create(&document, env_config)?;
        log::info!(
            "Environment for '{}' ready in {:?} ({} operations pending)",
            identity,
            started.elapsed(),
            tracker.pending()
        );

        Ok(Environment {
            identity: identity.to_string(),
            tracker,
            log,
            session: Mutex::new(Session {
                runtime: Some(runtime),
                renders: 0,
            }),
            created_at: Instant::now(),
        })
    }

    /// Wait for queued jobs, then close the runtime. Idempotent.
    pub(crate) async fn teardown(&self) {
        let mut session = self.session.lock().await;
        self.close_session(&mut session);
    }

    /// Close the runtime if no job holds the session right now.
    pub(crate) fn try_teardown(&self) -> bool {
        match self.session.try_lock() {
            Ok(mut session) => {
                self.close_session(&mut session);
                true
            }
            Err(_) => false,
        }
    }

    fn close_session(&self, session: &mut Session) {
        if let Some(runtime) = session.runtime.take() {
            runtime.close();
            log::debug!(
                "Closed environment for '{}' after {} renders (age {:?})",
                self.identity,
                session.renders,
                self.created_at.elapsed()
            );
        }
    }
}

/// Module hooks first, then window sizing, storage seeds and
/// instrumentation.
fn instrumented_init(
    modules: Option<InitHook>,
    config: &RendererConfig,
    viewport: crate::runtime::Viewport,
    tracker: &Arc<SettlementTracker>,
    log: Arc<dyn RenderLog>,
) -> InitHook {
    let seeds = config.local_storage.clone();
    let policy = config.timer_policy;
    let tracker = Arc::clone(tracker);
    Arc::new(move |window: &mut WindowSetup| {
        if let Some(modules) = &modules {
            modules(window);
        }
        window.viewport = viewport;
        window
            .local_storage
            .extend(seeds.iter().map(|(k, v)| (k.clone(), v.clone())));
        instrument::install(window, &tracker, Arc::clone(&log), policy);
    })
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("identity", &self.identity)
            .field("tracker", &self.tracker)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}
