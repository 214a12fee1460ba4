//! Error types for the prerenderer.
//!
//! This module provides [`RenderError`], a unified error type for every
//! renderer operation, and a convenient [`Result`] type alias.
//!
//! # Example
//!
//! ```rust
//! use spa_prerender::{RenderError, Result};
//!
//! fn render_home() -> Result<String> {
//!     // Your logic here...
//!     Err(RenderError::Configuration("example error".to_string()))
//! }
//!
//! match render_home() {
//!     Ok(markup) => println!("Rendered {} bytes", markup.len()),
//!     Err(RenderError::Closed) => println!("Renderer is closed"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::time::Duration;

/// Errors that can occur while constructing environments or rendering.
///
/// # Example
///
/// ```rust
/// use spa_prerender::RenderError;
///
/// fn handle_error(error: RenderError) {
///     match error {
///         RenderError::Closed => eprintln!("Renderer closed"),
///         RenderError::Aborted => eprintln!("Render cancelled"),
///         RenderError::Timeout(limit) => eprintln!("Gave up after {:?}", limit),
///         other => eprintln!("Render failed: {}", other),
///     }
/// }
/// ```
#[derive(Debug, Clone, thiserror::Error)]
pub enum RenderError {
    /// Operation attempted after [`Renderer::close()`](crate::Renderer::close).
    ///
    /// Fatal to the caller. Do not retry; the renderer will never accept
    /// new work again.
    #[error("Renderer closed")]
    Closed,

    /// The caller's [`AbortSignal`](crate::AbortSignal) fired while waiting
    /// for timers and network to settle.
    ///
    /// The environment stays usable: operations that were in flight keep
    /// running and the next render proceeds normally.
    #[error("Rendering aborted while waiting for timers and network to settle")]
    Aborted,

    /// The page did not settle within the configured
    /// [`render_timeout`](crate::RendererConfig::render_timeout).
    #[error("Rendering timed out after {0:?} waiting for the page to settle")]
    Timeout(Duration),

    /// A tracked operation was decremented without a matching increment.
    ///
    /// This is an invariant violation inside instrumentation and is not
    /// recoverable by the caller.
    #[error("Settlement tracker decremented below zero")]
    UnpairedTracking,

    /// A resource could not be fetched by any interceptor or the network.
    #[error("Failed to fetch {url}: {reason}")]
    ResourceFetch {
        /// The requested URL (or asset name).
        url: String,
        /// Why the fetch failed.
        reason: String,
    },

    /// The runtime factory failed to build an environment.
    #[error("Failed to create environment: {0}")]
    EnvironmentCreation(String),

    /// The runtime refused a navigation.
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// Invalid configuration provided.
    ///
    /// Use [`RendererConfigBuilder`](crate::RendererConfigBuilder), which
    /// validates configuration at build time.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RenderError {
    /// Shorthand for a [`RenderError::ResourceFetch`].
    pub fn fetch(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        RenderError::ResourceFetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// HTTP status code suitable for surfacing this error to a client.
    ///
    /// ```rust
    /// use spa_prerender::RenderError;
    ///
    /// assert_eq!(RenderError::Closed.status_code(), 503);
    /// assert_eq!(RenderError::Aborted.status_code(), 504);
    /// ```
    pub fn status_code(&self) -> u16 {
        match self {
            // Upstream asset or navigation problems
            Self::ResourceFetch { .. } | Self::Navigation(_) => 502,

            // Service unavailable
            Self::Closed => 503,

            // Gateway timeout
            Self::Aborted | Self::Timeout(_) => 504,

            Self::UnpairedTracking | Self::EnvironmentCreation(_) | Self::Configuration(_) => 500,
        }
    }

    /// Stable machine-readable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Closed => "RENDERER_CLOSED",
            Self::Aborted => "RENDER_ABORTED",
            Self::Timeout(_) => "RENDER_TIMEOUT",
            Self::UnpairedTracking => "UNPAIRED_TRACKING",
            Self::ResourceFetch { .. } => "RESOURCE_FETCH_FAILED",
            Self::EnvironmentCreation(_) => "ENVIRONMENT_CREATION_FAILED",
            Self::Navigation(_) => "NAVIGATION_FAILED",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Whether retrying the same render may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            // Transient
            Self::Aborted | Self::Timeout(_) | Self::ResourceFetch { .. } => true,
            Self::EnvironmentCreation(_) | Self::Navigation(_) => true,

            // Fatal
            Self::Closed | Self::UnpairedTracking | Self::Configuration(_) => false,
        }
    }
}

/// Convenience conversion from [`String`] to [`RenderError::Configuration`].
impl From<String> for RenderError {
    fn from(msg: String) -> Self {
        RenderError::Configuration(msg)
    }
}

/// Convenience conversion from `&str` to [`RenderError::Configuration`].
impl From<&str> for RenderError {
    fn from(msg: &str) -> Self {
        RenderError::Configuration(msg.to_string())
    }
}

/// Result type alias using [`RenderError`].
pub type Result<T> = std::result::Result<T, RenderError>;

// ============================================================================
// Unit Tests
// ============================================================================
