//! Scripted runtime for testing.
//!
//! This module provides [`MockRuntimeFactory`], a [`RuntimeFactory`] whose
//! "page scripts" are Rust closures registered on a [`MockApp`]. It honours
//! the full runtime contract, so renders against it exercise the real
//! instrumentation, resource chain and settle loop:
//!
//! - the init hook runs before any script, and scripts only ever see the
//!   primitives the hook left in the [`WindowSetup`]
//! - timers, requests and image loads run on the tokio runtime
//! - requests and images are served through `config.resources`
//! - the document `load` listeners run after the boot script and the route
//!   for the initial location
//!
//! # Feature Flag
//!
//! This module is only available when:
//! - The `test-utils` feature is enabled, OR
//! - During testing (`#[cfg(test)]`)
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use spa_prerender::runtime::mock::{MockApp, MockRuntimeFactory};
//!
//! let app = MockApp::new().route("/about", |page| {
//!     page.set_timeout(Duration::from_millis(10), |page| {
//!         page.set_body("<h1>About</h1>");
//!     });
//! });
//! let factory = MockRuntimeFactory::with_app(app);
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use super::{
    EnvironmentConfig, EventLoop, ImageApi, ImageCallback, ImageElement, ImageOutcome,
    IntervalTask, NetworkApi, RequestEvent, RequestListener, Runtime, RuntimeFactory, Task,
    TimerApi, TimerHandle, Viewport, WindowSetup,
};
use crate::error::{RenderError, Result};
use crate::logging::{ConsoleMessage, ConsoleSink};
use crate::markup::DeferredScripts;
use crate::resources::blobs::BlobStore;
use crate::resources::{ResourceKind, ResourceLoader, ResourceRequest};

/// Page script run against a [`Page`].
pub type Script = Arc<dyn Fn(&Page) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MockApp
// ============================================================================

/// The scripted application: a boot script plus one script per route.
#[derive(Clone, Default)]
pub struct MockApp {
    boot: Option<Script>,
    routes: HashMap<String, Script>,
    fallback: Option<Script>,
}

impl MockApp {
    /// An application that does nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script run once when the document loads, before the first route.
    pub fn on_boot<F>(mut self, script: F) -> Self
    where
        F: Fn(&Page) + Send + Sync + 'static,
    {
        self.boot = Some(Arc::new(script));
        self
    }

    /// Script run whenever the location's fragment becomes `path`.
    pub fn route<F>(mut self, path: impl Into<String>, script: F) -> Self
    where
        F: Fn(&Page) + Send + Sync + 'static,
    {
        self.routes.insert(path.into(), Arc::new(script));
        self
    }

    /// Script run for paths without a route of their own.
    pub fn fallback<F>(mut self, script: F) -> Self
    where
        F: Fn(&Page) + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(script));
        self
    }

    fn script_for(&self, path: &str) -> Option<Script> {
        self.routes.get(path).or(self.fallback.as_ref()).cloned()
    }
}

// ============================================================================
// MockRuntimeFactory
// ============================================================================

/// Mock runtime factory for testing without a document engine.
///
/// This factory can be configured to:
/// - Run a scripted [`MockApp`]
/// - Always fail with a specific error
/// - Track creation count for verification
///
/// # Thread Safety
///
/// This factory is `Send + Sync` and tracks state using atomic operations.
pub struct MockRuntimeFactory {
    app: MockApp,

    /// Custom error message when failing.
    fail_with: Option<String>,

    /// Number of `create` calls (for verification in tests).
    created: Arc<AtomicUsize>,
}

impl MockRuntimeFactory {
    /// A factory for an application without scripts.
    pub fn new() -> Self {
        Self::with_app(MockApp::new())
    }

    /// A factory running `app` in every environment.
    pub fn with_app(app: MockApp) -> Self {
        Self {
            app,
            fail_with: None,
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A factory that always fails with the given message.
    pub fn always_fails<S: Into<String>>(message: S) -> Self {
        Self {
            app: MockApp::new(),
            fail_with: Some(message.into()),
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of `create` calls so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Get a clone of the creation counter for external tracking.
    ///
    /// This allows test code to monitor creations after the factory has been
    /// moved into a renderer.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.created)
    }
}

impl Default for MockRuntimeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeFactory for MockRuntimeFactory {
    fn create(&self, document: &str, config: EnvironmentConfig) -> Result<Arc<dyn Runtime>> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(message) = &self.fail_with {
            log::debug!("MockRuntimeFactory: failing creation #{}", n);
            return Err(RenderError::EnvironmentCreation(message.clone()));
        }

        let tasks = Arc::new(TaskSet::default());
        let mut window = WindowSetup::new(
            Arc::new(MockTimers {
                tasks: Arc::clone(&tasks),
            }),
            Arc::new(MockNetwork {
                resources: Arc::clone(&config.resources),
                tasks: Arc::clone(&tasks),
            }),
            Arc::new(MockImages {
                resources: Arc::clone(&config.resources),
                tasks: Arc::clone(&tasks),
            }),
        );
        config.run_init(&mut window);
        let load_listeners = window.take_load_listeners();

        let page = Page {
            state: Arc::new(PageState {
                app: self.app.clone(),
                user_agent: config.user_agent.clone(),
                timers: window.timers,
                network: window.network,
                images: window.images,
                resources: config.resources,
                console: config.console,
                viewport: window.viewport,
                local_storage: Mutex::new(window.local_storage),
                object_urls: window.object_urls,
                document: Mutex::new(document.to_string()),
                location: Mutex::new(config.url),
                deferred: Mutex::new(DeferredScripts::default()),
                queue: Mutex::new(VecDeque::new()),
                tasks,
                closed: AtomicBool::new(false),
            }),
        };

        let path = page.path();
        page.enqueue(page.bind(move |page| {
            if let Some(boot) = page.state.app.boot.clone() {
                boot(page);
            }
            page.run_route(&path);
            for listener in load_listeners {
                listener();
            }
        }));

        log::debug!("MockRuntimeFactory: created runtime #{}", n);
        Ok(Arc::new(MockRuntime { page }))
    }
}

// ============================================================================
// Page
// ============================================================================

struct PageState {
    app: MockApp,
    user_agent: String,
    timers: Arc<dyn TimerApi>,
    network: Arc<dyn NetworkApi>,
    images: Arc<dyn ImageApi>,
    resources: Arc<dyn ResourceLoader>,
    console: Arc<dyn ConsoleSink>,
    viewport: Viewport,
    local_storage: Mutex<BTreeMap<String, String>>,
    object_urls: Option<Arc<BlobStore>>,
    document: Mutex<String>,
    location: Mutex<String>,
    deferred: Mutex<DeferredScripts>,
    queue: Mutex<VecDeque<Task>>,
    tasks: Arc<TaskSet>,
    closed: AtomicBool,
}

/// The page as seen by scripts.
///
/// Callbacks hold the page weakly: once the runtime is dropped they are
/// skipped.
#[derive(Clone)]
pub struct Page {
    state: Arc<PageState>,
}

impl Page {
    /// `navigator.userAgent`.
    pub fn user_agent(&self) -> String {
        self.state.user_agent.clone()
    }

    /// `innerWidth` / `innerHeight`.
    pub fn viewport(&self) -> Viewport {
        self.state.viewport
    }

    /// `location.href`.
    pub fn location(&self) -> String {
        lock(&self.state.location).clone()
    }

    /// The route: the fragment of the location, `/` if there is none.
    pub fn path(&self) -> String {
        let location = self.location();
        match location.split_once('#') {
            Some((_, fragment)) if !fragment.is_empty() => fragment.to_string(),
            _ => "/".to_string(),
        }
    }

    /// `localStorage.getItem`.
    pub fn local_storage(&self, key: &str) -> Option<String> {
        lock(&self.state.local_storage).get(key).cloned()
    }

    /// `localStorage.setItem`.
    pub fn set_local_storage(&self, key: impl Into<String>, value: impl Into<String>) {
        lock(&self.state.local_storage).insert(key.into(), value.into());
    }

    /// Current content of `<body>`.
    pub fn body(&self) -> String {
        let document = lock(&self.state.document);
        match body_range(&document) {
            Some((start, end)) => document[start..end].to_string(),
            None => String::new(),
        }
    }

    /// Replace the content of `<body>`.
    pub fn set_body(&self, html: &str) {
        let mut document = lock(&self.state.document);
        if let Some((start, end)) = body_range(&document) {
            document.replace_range(start..end, html);
        }
    }

    /// Append to the content of `<body>`.
    pub fn append_body(&self, html: &str) {
        let mut document = lock(&self.state.document);
        if let Some((_, end)) = body_range(&document) {
            document.insert_str(end, html);
        }
    }

    /// Set the scripts injected into the serialized output.
    pub fn set_deferred_scripts(&self, scripts: DeferredScripts) {
        *lock(&self.state.deferred) = scripts;
    }

    /// Write to the console.
    pub fn console(&self, message: ConsoleMessage) {
        self.state.console.message(message);
    }

    /// `URL.createObjectURL`, if the window has an object URL store.
    pub fn create_object_url(&self, bytes: impl Into<Bytes>) -> Option<String> {
        self.state.object_urls.as_ref().map(|store| store.register(bytes))
    }

    /// Resolve `url` against the current location.
    pub fn resolve(&self, url: &str) -> String {
        url::Url::parse(&self.location())
            .and_then(|base| base.join(url))
            .map(String::from)
            .unwrap_or_else(|_| url.to_string())
    }

    /// `setTimeout`.
    pub fn set_timeout<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce(&Page) + Send + 'static,
    {
        self.state.timers.set_timeout(delay, self.bind(callback))
    }

    /// `clearTimeout`.
    pub fn clear_timeout(&self, handle: TimerHandle) {
        self.state.timers.clear_timeout(handle);
    }

    /// `setInterval`.
    pub fn set_interval<F>(&self, period: Duration, mut callback: F) -> TimerHandle
    where
        F: FnMut(&Page) + Send + 'static,
    {
        let weak = Arc::downgrade(&self.state);
        self.state.timers.set_interval(
            period,
            Box::new(move || {
                if let Some(state) = weak.upgrade() {
                    callback(&Page { state });
                }
            }),
        )
    }

    /// `fetch(url)` through the network primitive.
    ///
    /// `callback` receives the body, or the error message of a failed
    /// request.
    pub fn fetch<F>(&self, url: &str, callback: F)
    where
        F: FnOnce(&Page, std::result::Result<Bytes, String>) + Send + 'static,
    {
        let weak = Arc::downgrade(&self.state);
        let mut callback = Some(callback);
        let mut outcome: Option<std::result::Result<Bytes, String>> = None;
        // Failures settle the promise at once; a response settles it on
        // loadend.
        let listener = move |event: &RequestEvent| {
            let result = match event {
                RequestEvent::Load { body, .. } => {
                    outcome = Some(Ok(body.clone()));
                    return;
                }
                RequestEvent::Progress { .. } => return,
                RequestEvent::Error(e) => Err(e.clone()),
                RequestEvent::Abort => Err("aborted".to_string()),
                RequestEvent::Timeout => Err("timeout".to_string()),
                RequestEvent::LoadEnd => outcome.take().unwrap_or_else(|| Err("no response".to_string())),
            };
            if let (Some(callback), Some(state)) = (callback.take(), weak.upgrade()) {
                callback(&Page { state }, result);
            }
        };
        self.state
            .network
            .open("GET", &self.resolve(url), Box::new(listener));
    }

    /// Load a subresource (script, stylesheet, font) the way the document
    /// would, bypassing the network primitive.
    pub fn load_resource<F>(&self, url: &str, kind: ResourceKind, callback: F)
    where
        F: FnOnce(&Page, std::result::Result<Bytes, String>) + Send + 'static,
    {
        let request = ResourceRequest::new(self.resolve(url)).with_kind(kind);
        let weak = Arc::downgrade(&self.state);
        match self.state.resources.fetch(&request) {
            Some(mut response) => {
                self.state.tasks.spawn(async move {
                    let result = (&mut response).await.map_err(|e| e.to_string());
                    if let Some(state) = weak.upgrade() {
                        callback(&Page { state }, result);
                    }
                    // The load stays counted until its handler has run.
                    drop(response);
                });
            }
            None => callback(self, Err(format!("no loader for {}", request.url))),
        }
    }

    /// Create an image element and assign `src`.
    pub fn load_image<F>(&self, src: &str, callback: F)
    where
        F: FnOnce(&Page, ImageOutcome) + Send + 'static,
    {
        let weak = Arc::downgrade(&self.state);
        let mut image = self.state.images.create_image();
        image.set_src(
            &self.resolve(src),
            Box::new(move |outcome| {
                if let Some(state) = weak.upgrade() {
                    callback(&Page { state }, outcome);
                }
            }),
        );
    }

    /// Queue `callback` on the event loop.
    pub fn queue<F>(&self, callback: F)
    where
        F: FnOnce(&Page) + Send + 'static,
    {
        self.enqueue(self.bind(callback));
    }

    fn bind<F>(&self, callback: F) -> Task
    where
        F: FnOnce(&Page) + Send + 'static,
    {
        let weak: Weak<PageState> = Arc::downgrade(&self.state);
        Box::new(move || {
            if let Some(state) = weak.upgrade() {
                callback(&Page { state });
            }
        })
    }

    fn enqueue(&self, task: Task) {
        if !self.state.closed.load(Ordering::SeqCst) {
            lock(&self.state.queue).push_back(task);
        }
    }

    fn drain(&self) {
        loop {
            let task = lock(&self.state.queue).pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }

    fn run_route(&self, path: &str) {
        if let Some(script) = self.state.app.script_for(path) {
            script(self);
        }
    }
}

/// Byte range of the content between `<body ...>` and `</body>`.
fn body_range(document: &str) -> Option<(usize, usize)> {
    let lower = document.to_ascii_lowercase();
    let open = lower.find("<body")?;
    let start = open + lower[open..].find('>')? + 1;
    let end = lower.rfind("</body>")?;
    (start <= end).then_some((start, end))
}

// ============================================================================
// MockRuntime
// ============================================================================

struct MockRuntime {
    page: Page,
}

impl EventLoop for MockRuntime {
    fn run_pending(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.page.drain();
            tokio::task::yield_now().await;
            self.page.drain();
        })
    }
}

impl Runtime for MockRuntime {
    fn location(&self) -> String {
        self.page.location()
    }

    fn navigate(&self, url: &str) -> Result<()> {
        if self.page.state.closed.load(Ordering::SeqCst) {
            return Err(RenderError::Navigation(format!("{}: runtime closed", url)));
        }
        *lock(&self.page.state.location) = url.to_string();
        let path = self.page.path();
        self.page.queue(move |page| page.run_route(&path));
        Ok(())
    }

    fn serialize(&self) -> String {
        lock(&self.page.state.document).clone()
    }

    fn deferred_scripts(&self) -> DeferredScripts {
        lock(&self.page.state.deferred).clone()
    }

    fn close(&self) {
        self.page.state.closed.store(true, Ordering::SeqCst);
        let queued = std::mem::take(&mut *lock(&self.page.state.queue));
        drop(queued);
        self.page.state.tasks.abort_all();
    }
}

// ============================================================================
// Native primitives
// ============================================================================

/// Background tasks of one runtime, abortable individually or all at once.
#[derive(Default)]
struct TaskSet {
    next: AtomicU64,
    handles: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl TaskSet {
    fn spawn<F>(&self, future: F) -> u64
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = tokio::spawn(future);
        let mut handles = lock(&self.handles);
        handles.retain(|_, handle| !handle.is_finished());
        handles.insert(id, handle);
        id
    }

    fn abort(&self, id: u64) {
        if let Some(handle) = lock(&self.handles).remove(&id) {
            handle.abort();
        }
    }

    fn abort_all(&self) {
        let handles = std::mem::take(&mut *lock(&self.handles));
        for handle in handles.into_values() {
            handle.abort();
        }
    }
}

struct MockTimers {
    tasks: Arc<TaskSet>,
}

impl TimerApi for MockTimers {
    fn set_timeout(&self, delay: Duration, callback: Task) -> TimerHandle {
        TimerHandle(self.tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        }))
    }

    fn clear_timeout(&self, handle: TimerHandle) {
        self.tasks.abort(handle.0);
    }

    fn set_interval(&self, period: Duration, mut callback: IntervalTask) -> TimerHandle {
        TimerHandle(self.tasks.spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                callback();
            }
        }))
    }

    fn clear_interval(&self, handle: TimerHandle) {
        self.tasks.abort(handle.0);
    }
}

struct MockNetwork {
    resources: Arc<dyn ResourceLoader>,
    tasks: Arc<TaskSet>,
}

impl NetworkApi for MockNetwork {
    fn open(&self, method: &str, url: &str, mut listener: Box<dyn RequestListener>) {
        log::trace!("MockNetwork: {} {}", method, url);
        match self.resources.fetch(&ResourceRequest::new(url)) {
            Some(response) => {
                self.tasks.spawn(async move {
                    match response.await {
                        Ok(body) => {
                            listener.on_event(&RequestEvent::Progress { loaded: body.len() });
                            listener.on_event(&RequestEvent::Load { status: 200, body });
                        }
                        Err(e) => listener.on_event(&RequestEvent::Error(e.to_string())),
                    }
                    listener.on_event(&RequestEvent::LoadEnd);
                });
            }
            None => {
                listener.on_event(&RequestEvent::Error(format!("no loader for {}", url)));
                listener.on_event(&RequestEvent::LoadEnd);
            }
        }
    }
}

struct MockImages {
    resources: Arc<dyn ResourceLoader>,
    tasks: Arc<TaskSet>,
}

impl ImageApi for MockImages {
    fn create_image(&self) -> Box<dyn ImageElement> {
        Box::new(MockImage {
            resources: Arc::clone(&self.resources),
            tasks: Arc::clone(&self.tasks),
            src: None,
            loading: None,
        })
    }
}

struct MockImage {
    resources: Arc<dyn ResourceLoader>,
    tasks: Arc<TaskSet>,
    src: Option<String>,
    loading: Option<u64>,
}

impl ImageElement for MockImage {
    fn set_src(&mut self, src: &str, on_settled: ImageCallback) {
        // A new src supersedes the load in progress.
        if let Some(previous) = self.loading.take() {
            self.tasks.abort(previous);
        }
        self.src = Some(src.to_string());

        let request = ResourceRequest::new(src).with_kind(ResourceKind::Image);
        match self.resources.fetch(&request) {
            Some(response) => {
                self.loading = Some(self.tasks.spawn(async move {
                    match response.await {
                        Ok(_) => on_settled(ImageOutcome::Loaded),
                        Err(e) => on_settled(ImageOutcome::Failed(e.to_string())),
                    }
                }));
            }
            None => on_settled(ImageOutcome::Failed(format!("no loader for {}", src))),
        }
    }

    fn src(&self) -> Option<String> {
        self.src.clone()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
