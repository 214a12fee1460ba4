//! Configuration for the renderer.
//!
//! This module provides [`RendererConfig`] and [`RendererConfigBuilder`]
//! for configuring where the application lives, how environments are sized,
//! and how long a render may wait for the page to settle.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use spa_prerender::RendererConfigBuilder;
//!
//! let config = RendererConfigBuilder::new()
//!     .base_url("https://app.example.com/")
//!     .block_list(["https://www.googletagmanager.com/gtag/js"])
//!     .render_timeout(Some(Duration::from_secs(30)))
//!     .build()
//!     .expect("Invalid configuration");
//!
//! assert_eq!(config.base_url, "https://app.example.com/");
//! assert_eq!(config.block_list.len(), 1);
//! ```
//!
//! # Environment Configuration
//!
//! When the `env-config` feature is enabled, you can load configuration
//! from environment variables and an optional `app.env` file:
//!
//! ```rust,ignore
//! use spa_prerender::config::env::from_env;
//!
//! let config = from_env()?;
//! ```
//!
//! See [`mod@env`] module for available environment variables.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::instrument::TimerPolicy;
use crate::runtime::Viewport;

/// Configuration for the renderer.
///
/// Use [`RendererConfigBuilder`] for validation and convenience.
///
/// # Fields Overview
///
/// | Field | Default | Description |
/// |-------|---------|-------------|
/// | `base_url` | `http://localhost/` | URL the application is served from |
/// | `index_document` | `index.html` | Asset loaded into every new environment |
/// | `block_list` | empty | URLs answered with an empty body |
/// | `mobile_markers` | Android, iPhone, Mobile | User-agent substrings selecting the mobile viewport |
/// | `mobile_viewport` | 411×731 | Viewport for mobile identities |
/// | `desktop_viewport` | 1920×1600 | Viewport for everything else |
/// | `local_storage` | `flutter.ServerSideRendering=true` | Seeded `localStorage` |
/// | `timer_policy` | pass-through | Timer delay remapping |
/// | `render_timeout` | 60s | Upper bound on one render's settle phase |
///
/// # Example
///
/// ```rust
/// use spa_prerender::RendererConfig;
///
/// let config = RendererConfig::default();
/// assert_eq!(config.index_document, "index.html");
/// ```
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// URL the application is served from.
    ///
    /// Must be absolute and end with `/`. Same-origin resources are the
    /// ones starting with this prefix; documents are addressed as
    /// `{base_url}#{path}`.
    pub base_url: String,

    /// Name of the document loaded into every new environment.
    pub index_document: String,

    /// Exact URLs that are answered with an empty body and never logged.
    pub block_list: Vec<String>,

    /// If the client identity contains any of these, the mobile viewport is
    /// used.
    pub mobile_markers: Vec<String>,

    /// Viewport for mobile identities.
    pub mobile_viewport: Viewport,

    /// Viewport for all other identities.
    pub desktop_viewport: Viewport,

    /// `localStorage` entries present before any page script runs.
    pub local_storage: BTreeMap<String, String>,

    /// How requested timer delays are remapped.
    ///
    /// # Default
    ///
    /// Pass-through: every delay is honoured as requested.
    pub timer_policy: TimerPolicy,

    /// Upper bound on the settle phase of one render.
    ///
    /// `None` waits for as long as the page keeps working; combine with a
    /// per-render [`AbortSignal`](crate::AbortSignal) in that case.
    ///
    /// # Default
    ///
    /// 60 seconds
    pub render_timeout: Option<Duration>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost/".to_string(),
            index_document: "index.html".to_string(),
            block_list: Vec::new(),
            mobile_markers: ["Android", "iPhone", "Mobile"]
                .into_iter()
                .map(String::from)
                .collect(),
            mobile_viewport: Viewport::new(411, 731),
            desktop_viewport: Viewport::new(1920, 1600),
            local_storage: BTreeMap::from([(
                "flutter.ServerSideRendering".to_string(),
                "true".to_string(),
            )]),
            timer_policy: TimerPolicy::passthrough(),
            render_timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl RendererConfig {
    /// Whether `identity` selects the mobile viewport.
    pub fn is_mobile(&self, identity: &str) -> bool {
        self.mobile_markers
            .iter()
            .any(|marker| identity.contains(marker.as_str()))
    }

    /// Viewport for `identity`.
    pub fn viewport_for(&self, identity: &str) -> Viewport {
        if self.is_mobile(identity) {
            self.mobile_viewport
        } else {
            self.desktop_viewport
        }
    }

    /// Document URL for `path`.
    ///
    /// ```rust
    /// use spa_prerender::RendererConfig;
    ///
    /// let config = RendererConfig::default();
    /// assert_eq!(config.location_for("/about"), "http://localhost/#/about");
    /// ```
    pub fn location_for(&self, path: &str) -> String {
        format!("{}#{}", self.base_url, path)
    }
}

/// Builder for [`RendererConfig`] with validation.
///
/// # Validation
///
/// The [`build()`](Self::build) method validates:
/// - `base_url` must be an absolute URL ending with `/`
/// - `index_document` must not be empty
/// - `render_timeout`, when set, must be non-zero
/// - both viewports must have non-zero dimensions
pub struct RendererConfigBuilder {
    config: RendererConfig,
}

impl RendererConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            config: RendererConfig::default(),
        }
    }

    /// Set the base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    /// Set the index document name.
    pub fn index_document(mut self, name: impl Into<String>) -> Self {
        self.config.index_document = name.into();
        self
    }

    /// Replace the block list.
    pub fn block_list<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.block_list = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the mobile markers.
    pub fn mobile_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.mobile_markers = markers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the mobile viewport.
    pub fn mobile_viewport(mut self, viewport: Viewport) -> Self {
        self.config.mobile_viewport = viewport;
        self
    }

    /// Set the desktop viewport.
    pub fn desktop_viewport(mut self, viewport: Viewport) -> Self {
        self.config.desktop_viewport = viewport;
        self
    }

    /// Add a `localStorage` seed.
    pub fn local_storage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.local_storage.insert(key.into(), value.into());
        self
    }

    /// Set the timer policy.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use spa_prerender::RendererConfigBuilder;
    /// use spa_prerender::instrument::TimerPolicy;
    ///
    /// let config = RendererConfigBuilder::new()
    ///     .timer_policy(TimerPolicy {
    ///         defer_threshold: Some(Duration::from_secs(10)),
    ///         max_delay: None,
    ///     })
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(config.timer_policy.defer_threshold, Some(Duration::from_secs(10)));
    /// ```
    pub fn timer_policy(mut self, policy: TimerPolicy) -> Self {
        self.config.timer_policy = policy;
        self
    }

    /// Set the render timeout (`None` disables it).
    pub fn render_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.render_timeout = timeout;
        self
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    ///
    /// # Example
    ///
    /// ```rust
    /// use spa_prerender::RendererConfigBuilder;
    ///
    /// assert!(RendererConfigBuilder::new().base_url("https://a.example/").build().is_ok());
    ///
    /// // Missing trailing slash
    /// assert!(RendererConfigBuilder::new().base_url("https://a.example/app").build().is_err());
    ///
    /// // Not absolute
    /// assert!(RendererConfigBuilder::new().base_url("/app/").build().is_err());
    /// ```
    pub fn build(self) -> std::result::Result<RendererConfig, String> {
        let config = self.config;

        match url::Url::parse(&config.base_url) {
            Ok(url) if url.cannot_be_a_base() => {
                return Err(format!("base_url cannot be a base URL: {}", config.base_url));
            }
            Ok(_) => {}
            Err(e) => return Err(format!("base_url is not an absolute URL ({}): {}", e, config.base_url)),
        }
        if !config.base_url.ends_with('/') {
            return Err("base_url must end with '/'".to_string());
        }

        if config.index_document.is_empty() {
            return Err("index_document must not be empty".to_string());
        }

        if config.render_timeout == Some(Duration::ZERO) {
            return Err("render_timeout must be greater than 0 (use None to disable)".to_string());
        }

        for (name, viewport) in [
            ("mobile_viewport", config.mobile_viewport),
            ("desktop_viewport", config.desktop_viewport),
        ] {
            if viewport.width == 0 || viewport.height == 0 {
                return Err(format!("{} must have non-zero dimensions", name));
            }
        }

        Ok(config)
    }
}

impl Default for RendererConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Environment Configuration (feature-gated)
// ============================================================================

/// Environment-based configuration loading.
///
/// This module is only available when the `env-config` feature is enabled.
///
/// # Environment File
///
/// This module uses `dotenvy` to load environment variables from an `app.env`
/// file in the current directory. The file is optional - if not found,
/// environment variables and defaults are used.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `SSR_BASE_URL` | String | `http://localhost/` | Application base URL |
/// | `SSR_INDEX_DOCUMENT` | String | `index.html` | Initial document |
/// | `SSR_BLOCK_LIST` | comma list | empty | URLs answered with empty content |
/// | `SSR_RENDER_TIMEOUT_SECONDS` | u64 | 60 | Settle timeout, 0 disables |
/// | `SSR_TIMER_DEFER_THRESHOLD_MS` | u64 | unset | Timers at or above this never run |
/// | `SSR_TIMER_MAX_DELAY_MS` | u64 | unset | Cap for remaining timer delays |
/// | `SSR_ASSET_ROOT` | path | unset | Directory holding the compiled app |
///
/// # Example `app.env` File
///
/// ```text
/// # Application
/// SSR_BASE_URL=https://app.example.com/
/// SSR_ASSET_ROOT=/srv/app/build/web
///
/// # Rendering
/// SSR_RENDER_TIMEOUT_SECONDS=30
/// SSR_TIMER_DEFER_THRESHOLD_MS=10000
/// SSR_BLOCK_LIST=https://www.googletagmanager.com/gtag/js,https://fonts.googleapis.com/css
/// ```
#[cfg(feature = "env-config")]
pub mod env {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::error::RenderError;
    use crate::renderer::{Renderer, RendererBuilder};
    use crate::resources::app::DirectoryAssets;
    use crate::runtime::RuntimeFactory;

    /// Default environment file name.
    pub const ENV_FILE_NAME: &str = "app.env";

    /// Load environment variables from `app.env` file.
    ///
    /// This function is automatically called by [`from_env`], but you can
    /// call it explicitly if you need to load the file earlier or check
    /// for errors.
    pub fn load_env_file() -> Result<PathBuf, dotenvy::Error> {
        dotenvy::from_filename(ENV_FILE_NAME)
    }

    /// Parse `name` with `lookup`, warning about and ignoring values that do
    /// not parse.
    fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = lookup(name)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Ignoring invalid {}={:?}: {} (using default)", name, raw, e);
                None
            }
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Values that do not parse are logged with `log::warn!` and replaced by
    /// their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Configuration`] if configuration values are invalid.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use spa_prerender::config::env::from_env;
    ///
    /// std::env::set_var("SSR_BASE_URL", "https://app.example.com/");
    ///
    /// let config = from_env()?;
    /// assert_eq!(config.base_url, "https://app.example.com/");
    /// ```
    pub fn from_env() -> Result<RendererConfig, RenderError> {
        // Load app.env file if present (ignore errors if not found)
        match load_env_file() {
            Ok(path) => {
                log::info!("Loaded configuration from: {:?}", path);
            }
            Err(e) => {
                log::debug!(
                    "No {} file found or failed to load: {} (using environment variables and defaults)",
                    ENV_FILE_NAME,
                    e
                );
            }
        }

        from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from `lookup`, which maps a variable name to its
    /// value.
    ///
    /// [`from_env`] uses the process environment; tests and embedders can
    /// supply their own source.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Configuration`] if configuration values are invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<RendererConfig, RenderError> {
        let defaults = RendererConfig::default();

        let base_url = lookup("SSR_BASE_URL").unwrap_or(defaults.base_url);
        let index_document = lookup("SSR_INDEX_DOCUMENT").unwrap_or(defaults.index_document);
        let block_list: Vec<String> = lookup("SSR_BLOCK_LIST")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let render_timeout = match parsed::<u64>(&lookup, "SSR_RENDER_TIMEOUT_SECONDS") {
            Some(0) => None,
            Some(seconds) => Some(Duration::from_secs(seconds)),
            None => defaults.render_timeout,
        };
        let timer_policy = TimerPolicy {
            defer_threshold: parsed(&lookup, "SSR_TIMER_DEFER_THRESHOLD_MS").map(Duration::from_millis),
            max_delay: parsed(&lookup, "SSR_TIMER_MAX_DELAY_MS").map(Duration::from_millis),
        };

        log::info!("Loading renderer configuration from environment:");
        log::info!("   - Base URL: {}", base_url);
        log::info!("   - Index document: {}", index_document);
        log::info!("   - Blocked URLs: {}", block_list.len());
        log::info!("   - Render timeout: {:?}", render_timeout);
        log::info!("   - Timer policy: {:?}", timer_policy);

        RendererConfigBuilder::new()
            .base_url(base_url)
            .index_document(index_document)
            .block_list(block_list)
            .render_timeout(render_timeout)
            .timer_policy(timer_policy)
            .build()
            .map_err(RenderError::Configuration)
    }

    /// Get the asset directory from `SSR_ASSET_ROOT`.
    ///
    /// **Note:** Call [`from_env`] or [`load_env_file`] first to ensure
    /// `app.env` is loaded if you're using a configuration file.
    pub fn asset_root_from_env() -> Option<PathBuf> {
        std::env::var_os("SSR_ASSET_ROOT").map(PathBuf::from)
    }

    /// Build a renderer entirely from the environment.
    ///
    /// Assets are served from `SSR_ASSET_ROOT`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Configuration`] if the configuration is
    /// invalid or `SSR_ASSET_ROOT` is unset.
    pub fn init_renderer(factory: Arc<dyn RuntimeFactory>) -> Result<Renderer, RenderError> {
        let config = from_env()?;
        let root = asset_root_from_env()
            .ok_or_else(|| RenderError::Configuration("SSR_ASSET_ROOT is not set".to_string()))?;
        log::info!("Serving application assets from {:?}", root);

        RendererBuilder::new()
            .config(config)
            .factory(factory)
            .assets(Arc::new(DirectoryAssets::new(root)))
            .build()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
