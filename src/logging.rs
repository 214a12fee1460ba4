//! Render-scoped logging.
//!
//! Internal diagnostics go through the [`log`] facade. Messages that belong
//! to one render (request BEGIN/END lines, unexpected resources, the page's
//! own console output) go to the [`RenderLog`] the caller passed to
//! [`Renderer::render`](crate::Renderer::render).
//!
//! Each environment owns a [`LogProxy`]. A render attaches its destination
//! for the duration of the job and the returned [`AttachedLog`] detaches it
//! on drop, so renders for different client identities never write into each
//! other's logs.

use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Destination for render-scoped messages.
///
/// Every level takes a message and an optional error.
pub trait RenderLog: Send + Sync {
    /// Trace level.
    fn trace(&self, message: &str, error: Option<&(dyn StdError + 'static)>);
    /// Debug level.
    fn debug(&self, message: &str, error: Option<&(dyn StdError + 'static)>);
    /// Info level.
    fn info(&self, message: &str, error: Option<&(dyn StdError + 'static)>);
    /// Warn level.
    fn warn(&self, message: &str, error: Option<&(dyn StdError + 'static)>);
    /// Error level.
    fn error(&self, message: &str, error: Option<&(dyn StdError + 'static)>);
    /// Fatal level.
    fn fatal(&self, message: &str, error: Option<&(dyn StdError + 'static)>);
}

/// [`RenderLog`] that forwards to the `log` facade under target
/// `spa_prerender::page`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCrateSink;

const PAGE_TARGET: &str = "spa_prerender::page";

fn forward(level: log::Level, message: &str, error: Option<&(dyn StdError + 'static)>) {
    match error {
        Some(e) => log::log!(target: PAGE_TARGET, level, "{}: {}", message, e),
        None => log::log!(target: PAGE_TARGET, level, "{}", message),
    }
}

impl RenderLog for LogCrateSink {
    fn trace(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        forward(log::Level::Trace, message, error)
    }
    fn debug(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        forward(log::Level::Debug, message, error)
    }
    fn info(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        forward(log::Level::Info, message, error)
    }
    fn warn(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        forward(log::Level::Warn, message, error)
    }
    fn error(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        forward(log::Level::Error, message, error)
    }
    // The facade has no fatal level.
    fn fatal(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        forward(log::Level::Error, message, error)
    }
}

/// Swappable per-environment log destination.
///
/// Messages sent while nothing is attached are dropped.
#[derive(Default)]
pub struct LogProxy {
    destination: RwLock<Option<Arc<dyn RenderLog>>>,
}

impl LogProxy {
    /// Create a detached proxy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `destination` until the returned guard is dropped.
    pub fn attach(self: &Arc<Self>, destination: Arc<dyn RenderLog>) -> AttachedLog {
        *self
            .destination
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(destination);
        AttachedLog {
            proxy: Arc::clone(self),
        }
    }

    /// Whether a destination is currently attached.
    pub fn is_attached(&self) -> bool {
        self.current().is_some()
    }

    fn detach(&self) {
        *self
            .destination
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn current(&self) -> Option<Arc<dyn RenderLog>> {
        self.destination
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RenderLog for LogProxy {
    fn trace(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        if let Some(d) = self.current() {
            d.trace(message, error)
        }
    }
    fn debug(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        if let Some(d) = self.current() {
            d.debug(message, error)
        }
    }
    fn info(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        if let Some(d) = self.current() {
            d.info(message, error)
        }
    }
    fn warn(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        if let Some(d) = self.current() {
            d.warn(message, error)
        }
    }
    fn error(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        if let Some(d) = self.current() {
            d.error(message, error)
        }
    }
    fn fatal(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        if let Some(d) = self.current() {
            d.fatal(message, error)
        }
    }
}

impl fmt::Debug for LogProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogProxy")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Detaches the proxy's destination when dropped.
#[must_use = "the destination is detached as soon as the guard is dropped"]
pub struct AttachedLog {
    proxy: Arc<LogProxy>,
}

impl Drop for AttachedLog {
    fn drop(&mut self) {
        self.proxy.detach();
    }
}

// ============================================================================
// Page console
// ============================================================================

/// One message written by page script to its console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleMessage {
    /// Uncaught script error reported by the runtime itself.
    ScriptError(String),
    /// `console.error`.
    Error(String),
    /// `console.warn`.
    Warn(String),
    /// `console.info`.
    Info(String),
    /// `console.trace`.
    Trace(String),
    /// `console.log`.
    Log(String),
    /// `console.dir`.
    Dir(String),
}

/// Receiver of page console output.
pub trait ConsoleSink: Send + Sync {
    /// Handle one message.
    fn message(&self, message: ConsoleMessage);
}

/// Console that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullConsole;

impl ConsoleSink for NullConsole {
    fn message(&self, _message: ConsoleMessage) {}
}

/// Routes page console output into a render log.
pub struct ConsoleBridge {
    log: Arc<dyn RenderLog>,
}

impl ConsoleBridge {
    /// Bridge into `log`.
    pub fn new(log: Arc<dyn RenderLog>) -> Self {
        Self { log }
    }
}

impl ConsoleSink for ConsoleBridge {
    fn message(&self, message: ConsoleMessage) {
        match message {
            ConsoleMessage::ScriptError(e) => self.log.error(
                &format!("Javascript error during server-side rendering: {}", e),
                None,
            ),
            ConsoleMessage::Error(m) => self.log.error(
                &format!("Error from javascript during server-side rendering: {}", m),
                None,
            ),
            ConsoleMessage::Warn(m) => self.log.warn(
                &format!("Warning from javascript during server-side rendering: {}", m),
                None,
            ),
            ConsoleMessage::Info(m) => self.log.debug(
                &format!("Info from javascript during server-side rendering: {}", m),
                None,
            ),
            ConsoleMessage::Trace(m) => self.log.trace(
                &format!("Trace from javascript during server-side rendering: {}", m),
                None,
            ),
            ConsoleMessage::Log(m) => self.log.trace(
                &format!("Log from javascript during server-side rendering: {}", m),
                None,
            ),
            ConsoleMessage::Dir(m) => self.log.trace(
                &format!("Dir from javascript during server-side rendering: {}", m),
                None,
            ),
        }
    }
}

// ============================================================================
// Test support
// ============================================================================

/// [`RenderLog`] that records every line in memory.
///
/// Useful for asserting that a render was error-free.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: std::sync::Mutex<Vec<(log::Level, String)>>,
    fatal: std::sync::atomic::AtomicBool,
}

#[cfg(any(test, feature = "test-utils"))]
impl MemoryLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, level: log::Level, message: &str, error: Option<&(dyn StdError + 'static)>) {
        let line = match error {
            Some(e) => format!("{}: {}", message, e),
            None => message.to_string(),
        };
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, line));
    }

    /// All recorded lines.
    pub fn lines(&self) -> Vec<(log::Level, String)> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether nothing at error or fatal level was logged.
    pub fn error_free(&self) -> bool {
        !self.fatal.load(std::sync::atomic::Ordering::SeqCst)
            && self.lines().iter().all(|(level, _)| *level != log::Level::Error)
    }

    /// Whether any line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|(_, line)| line.contains(needle))
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl RenderLog for MemoryLog {
    fn trace(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        self.push(log::Level::Trace, message, error)
    }
    fn debug(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        self.push(log::Level::Debug, message, error)
    }
    fn info(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        self.push(log::Level::Info, message, error)
    }
    fn warn(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        self.push(log::Level::Warn, message, error)
    }
    fn error(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        self.push(log::Level::Error, message, error)
    }
    fn fatal(&self, message: &str, error: Option<&(dyn StdError + 'static)>) {
        self.fatal.store(true, std::sync::atomic::Ordering::SeqCst);
        self.push(log::Level::Error, message, error)
    }
}
