//! Composition of environment configuration.
//!
//! A [`Module`] contributes at most one resource handler and at most one
//! init hook, both closed over private state created once per environment.
//! An [`App`] is an ordered list of modules; [`App::config`] folds them over
//! a base [`EnvironmentConfig`] right-to-left, so for every module:
//!
//! - its resource handler wraps everything declared after it (the first
//!   declared module sees each request first), and
//! - its init hook runs before the hooks of modules declared after it.
//!
//! ```text
//! App::new().with(a).with(b).config(base)
//!
//!   resources: a ─▶ b ─▶ base.resources
//!   init:      a(w); b(w); base.init(w)
//! ```
//!
//! # Example
//!
//! ```rust
//! use spa_prerender::middleware::{App, init_module};
//!
//! let app = App::new()
//!     .with(init_module("vendor", |window| {
//!         window.local_storage.insert("vendor".into(), "Google Inc.".into());
//!     }));
//! assert_eq!(app.names(), vec!["vendor"]);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::resources::{Layered, ResourceHandler};
use crate::runtime::{EnvironmentConfig, InitHook, WindowSetup};

/// A unit of environment customisation with per-environment state.
pub trait Module: Send + Sync + 'static {
    /// State created for every environment the module is applied to.
    type State: Send + Sync + 'static;

    /// Name used in logs.
    fn name(&self) -> &str;

    /// Create fresh state for one environment.
    fn create_state(&self) -> Self::State;

    /// Resource handler bound to `state`.
    fn resources(&self, _state: &Arc<Self::State>) -> Option<Arc<dyn ResourceHandler>> {
        None
    }

    /// Init hook bound to `state`.
    fn init(&self, _state: &Arc<Self::State>) -> Option<InitHook> {
        None
    }
}

/// Object-safe form of a module: a configuration transformer.
pub trait Middleware: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Produce the configuration for one environment.
    fn apply(&self, config: EnvironmentConfig) -> EnvironmentConfig;
}

impl<M: Module> Middleware for M {
    fn name(&self) -> &str {
        Module::name(self)
    }

    fn apply(&self, mut config: EnvironmentConfig) -> EnvironmentConfig {
        let state = Arc::new(self.create_state());

        if let Some(handler) = self.resources(&state) {
            config.resources = Arc::new(Layered::new(handler, config.resources));
        }
        if let Some(hook) = self.init(&state) {
            config.init = Some(match config.init.take() {
                Some(wrapped) => {
                    let chained: InitHook = Arc::new(move |window: &mut WindowSetup| {
                        hook(window);
                        wrapped(window);
                    });
                    chained
                }
                None => hook,
            });
        }
        log::trace!("Applied middleware '{}'", Module::name(self));
        config
    }
}

// ============================================================================
// Stateless modules
// ============================================================================

/// A module without state.
///
/// Build one with [`resource_module`] or [`init_module`].
pub struct Stateless {
    name: String,
    resources: Option<Arc<dyn ResourceHandler>>,
    init: Option<InitHook>,
}

impl Module for Stateless {
    type State = ();

    fn name(&self) -> &str {
        &self.name
    }

    fn create_state(&self) {}

    fn resources(&self, _state: &Arc<()>) -> Option<Arc<dyn ResourceHandler>> {
        self.resources.clone()
    }

    fn init(&self, _state: &Arc<()>) -> Option<InitHook> {
        self.init.clone()
    }
}

/// A module contributing only a resource handler.
pub fn resource_module(name: impl Into<String>, handler: impl ResourceHandler + 'static) -> Stateless {
    Stateless {
        name: name.into(),
        resources: Some(Arc::new(handler)),
        init: None,
    }
}

/// A module contributing only an init hook.
pub fn init_module<F>(name: impl Into<String>, hook: F) -> Stateless
where
    F: Fn(&mut WindowSetup) + Send + Sync + 'static,
{
    Stateless {
        name: name.into(),
        resources: None,
        init: Some(Arc::new(hook)),
    }
}

// ============================================================================
// App
// ============================================================================

/// Ordered list of middleware.
#[derive(Clone, Default)]
pub struct App {
    layers: Vec<Arc<dyn Middleware>>,
}

impl App {
    /// An app with no middleware.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `middleware`.
    pub fn with(mut self, middleware: impl Middleware + 'static) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    /// Append an already shared middleware.
    pub fn with_shared(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.layers.push(middleware);
        self
    }

    /// Append every middleware of `other`, keeping its order.
    pub fn then(mut self, other: App) -> Self {
        self.layers.extend(other.layers);
        self
    }

    /// Build one environment's configuration from `base`.
    pub fn config(&self, base: EnvironmentConfig) -> EnvironmentConfig {
        self.layers
            .iter()
            .rev()
            .fold(base, |config, layer| layer.apply(config))
    }

    /// Middleware names in declared order.
    pub fn names(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    /// Number of middleware.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the app has no middleware.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App").field("layers", &self.names()).finish()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
