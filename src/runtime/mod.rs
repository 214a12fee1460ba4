//! Boundary to the emulated document runtime.
//!
//! The DOM/JS execution engine is not part of this crate. This module defines
//! what the renderer needs from it:
//!
//! - [`RuntimeFactory`] builds one [`Runtime`] per environment from the
//!   initial document and an [`EnvironmentConfig`].
//! - Before any script runs, the runtime hands its native asynchronous
//!   primitives to the configured init hook inside a [`WindowSetup`]. Hooks
//!   replace them with decorated versions (that is how instrumentation is
//!   installed) and the runtime must use whatever the hook left behind.
//! - [`EventLoop::run_pending`] is the yield point of the settle loop.
//!
//! # Implementors
//!
//! | Type | Description |
//! |------|-------------|
//! | [`mock::MockRuntimeFactory`] | Scripted test double (feature `test-utils`) |
//!
//! # Custom runtime
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use spa_prerender::runtime::{EnvironmentConfig, Runtime, RuntimeFactory};
//! use spa_prerender::Result;
//!
//! struct MyEngineFactory;
//!
//! impl RuntimeFactory for MyEngineFactory {
//!     fn create(&self, document: &str, config: EnvironmentConfig) -> Result<Arc<dyn Runtime>> {
//!         // Build natives, run config.run_init(&mut window), parse document...
//!         todo!()
//!     }
//! }
//! ```

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::error::Result;
use crate::logging::{ConsoleSink, NullConsole};
use crate::markup::DeferredScripts;
use crate::resources::ResourceLoader;
use crate::resources::blobs::BlobStore;

/// A unit of work queued on the runtime's event loop.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A repeating callback.
pub type IntervalTask = Box<dyn FnMut() + Send + 'static>;

/// Hook run against the window before the document is parsed.
pub type InitHook = Arc<dyn Fn(&mut WindowSetup) + Send + Sync>;

// ============================================================================
// Native primitives
// ============================================================================

/// Opaque timer identifier handed back to page code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

/// Timer scheduling (`setTimeout` / `setInterval` and their cancel calls).
pub trait TimerApi: Send + Sync {
    /// Run `callback` once after `delay`.
    fn set_timeout(&self, delay: Duration, callback: Task) -> TimerHandle;

    /// Cancel a timeout. Unknown or already-fired handles are ignored.
    fn clear_timeout(&self, handle: TimerHandle);

    /// Run `callback` every `period`.
    fn set_interval(&self, period: Duration, callback: IntervalTask) -> TimerHandle;

    /// Cancel an interval.
    fn clear_interval(&self, handle: TimerHandle);
}

/// Lifecycle events of one network request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    /// Bytes arrived. Not terminal.
    Progress {
        /// Bytes received so far.
        loaded: usize,
    },
    /// The response completed.
    Load {
        /// HTTP-like status.
        status: u16,
        /// Response body.
        body: Bytes,
    },
    /// Final event after load, error, abort or timeout.
    LoadEnd,
    /// The request failed.
    Error(String),
    /// The page aborted the request.
    Abort,
    /// The request timed out.
    Timeout,
}

impl RequestEvent {
    /// Whether this event ends the request.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestEvent::Progress { .. })
    }
}

/// Receiver of [`RequestEvent`]s for one request.
pub trait RequestListener: Send {
    /// Called for every event, in order.
    fn on_event(&mut self, event: &RequestEvent);
}

impl<F> RequestListener for F
where
    F: FnMut(&RequestEvent) + Send,
{
    fn on_event(&mut self, event: &RequestEvent) {
        self(event)
    }
}

/// Network primitive (`XMLHttpRequest` / `fetch` from page code).
pub trait NetworkApi: Send + Sync {
    /// Open and dispatch a request; all of its events go to `listener`.
    fn open(&self, method: &str, url: &str, listener: Box<dyn RequestListener>);
}

/// Result of an image load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    /// The `load` event fired.
    Loaded,
    /// The `error` event fired.
    Failed(String),
}

/// Callback receiving the outcome of one `src` assignment.
pub type ImageCallback = Box<dyn FnOnce(ImageOutcome) + Send + 'static>;

/// An image element created by page code.
pub trait ImageElement: Send {
    /// Assign a source and start loading it. `on_settled` is invoked once
    /// with the outcome, or dropped if the load is superseded.
    fn set_src(&mut self, src: &str, on_settled: ImageCallback);

    /// The current source, if any.
    fn src(&self) -> Option<String>;
}

/// Image element creation.
pub trait ImageApi: Send + Sync {
    /// Create a detached image element.
    fn create_image(&self) -> Box<dyn ImageElement>;
}

/// Window inner size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// `innerWidth`.
    pub width: u32,
    /// `innerHeight`.
    pub height: u32,
}

impl Viewport {
    /// Create a viewport.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport::new(1024, 768)
    }
}

// ============================================================================
// WindowSetup
// ============================================================================

/// The window as seen by init hooks, before the document is parsed.
///
/// Runtimes construct this with their native primitives, run
/// [`EnvironmentConfig::run_init`] against it, and then wire page code to the
/// primitives it holds afterwards.
pub struct WindowSetup {
    /// Timer primitive page code will use.
    pub timers: Arc<dyn TimerApi>,
    /// Network primitive page code will use.
    pub network: Arc<dyn NetworkApi>,
    /// Image element factory page code will use.
    pub images: Arc<dyn ImageApi>,
    /// `innerWidth` / `innerHeight`.
    pub viewport: Viewport,
    /// Initial `localStorage` contents.
    pub local_storage: BTreeMap<String, String>,
    /// Backing store for `URL.createObjectURL`, when installed.
    pub object_urls: Option<Arc<BlobStore>>,
    load_listeners: Vec<Task>,
}

impl WindowSetup {
    /// Create a window around native primitives.
    pub fn new(
        timers: Arc<dyn TimerApi>,
        network: Arc<dyn NetworkApi>,
        images: Arc<dyn ImageApi>,
    ) -> Self {
        Self {
            timers,
            network,
            images,
            viewport: Viewport::default(),
            local_storage: BTreeMap::new(),
            object_urls: None,
            load_listeners: Vec::new(),
        }
    }

    /// Register a listener for the document `load` event.
    pub fn on_load(&mut self, listener: Task) {
        self.load_listeners.push(listener);
    }

    /// Hand the registered load listeners to the runtime.
    pub fn take_load_listeners(&mut self) -> Vec<Task> {
        std::mem::take(&mut self.load_listeners)
    }
}

impl fmt::Debug for WindowSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowSetup")
            .field("viewport", &self.viewport)
            .field("local_storage", &self.local_storage)
            .field("object_urls", &self.object_urls.is_some())
            .field("load_listeners", &self.load_listeners.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// EnvironmentConfig
// ============================================================================

/// Everything a runtime needs to construct one environment.
///
/// Built by folding [`Middleware`](crate::middleware::Middleware) over a base
/// configuration.
#[derive(Clone)]
pub struct EnvironmentConfig {
    /// `navigator.userAgent`.
    pub user_agent: String,
    /// Initial document URL.
    pub url: String,
    /// Loader for every subresource the document requests.
    pub resources: Arc<dyn ResourceLoader>,
    /// Hook run before parsing.
    pub init: Option<InitHook>,
    /// Destination of the page's console output.
    pub console: Arc<dyn ConsoleSink>,
}

impl EnvironmentConfig {
    /// Create a configuration with no init hook and a discarding console.
    pub fn new(
        user_agent: impl Into<String>,
        url: impl Into<String>,
        resources: Arc<dyn ResourceLoader>,
    ) -> Self {
        Self {
            user_agent: user_agent.into(),
            url: url.into(),
            resources,
            init: None,
            console: Arc::new(NullConsole),
        }
    }

    /// Run the init hook, if any.
    pub fn run_init(&self, window: &mut WindowSetup) {
        if let Some(init) = &self.init {
            init(window);
        }
    }
}

impl fmt::Debug for EnvironmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentConfig")
            .field("user_agent", &self.user_agent)
            .field("url", &self.url)
            .field("init", &self.init.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Runtime
// ============================================================================

/// The yield point used by the settle loop.
pub trait EventLoop: Send + Sync {
    /// Let queued microtasks and macrotasks run, then return.
    fn run_pending(&self) -> BoxFuture<'_, ()>;
}

/// One emulated document instance.
pub trait Runtime: EventLoop {
    /// Current `location.href`.
    fn location(&self) -> String;

    /// Assign `location.href`.
    fn navigate(&self, url: &str) -> Result<()>;

    /// Serialize the current document to markup.
    fn serialize(&self) -> String;

    /// Scripts to inject into serialized markup.
    fn deferred_scripts(&self) -> DeferredScripts {
        DeferredScripts::default()
    }

    /// Tear the document down. No further calls follow.
    fn close(&self);
}

/// Trait for runtime factory pattern.
///
/// Abstracts environment construction so the renderer never depends on a
/// particular engine. Requires `Send + Sync` because one factory serves all
/// client identities.
pub trait RuntimeFactory: Send + Sync {
    /// Construct a runtime for `document`.
    ///
    /// Implementations must run `config.run_init` before any page script
    /// executes, route subresource loads through `config.resources`, and
    /// invoke the window's load listeners when the document finishes
    /// loading.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::EnvironmentCreation`](crate::RenderError::EnvironmentCreation)
    /// if the document cannot be loaded.
    fn create(&self, document: &str, config: EnvironmentConfig) -> Result<Arc<dyn Runtime>>;
}
