//! Convenient imports for common usage patterns.
//!
//! This module re-exports the most commonly used types from `spa-prerender`,
//! allowing you to quickly get started with a single import.
//!
//! # Usage
//!
//! ```rust,ignore
//! use spa_prerender::prelude::*;
//! ```
//!
//! This imports:
//!
//! - [`Renderer`] - Main renderer type
//! - [`RendererBuilder`] - Renderer builder
//! - [`RendererConfig`] - Configuration struct
//! - [`RendererConfigBuilder`] - Configuration builder
//! - [`RenderError`] - Error type
//! - [`Result`] - Result type alias
//! - [`RendererStats`] - Renderer statistics
//! - [`AbortController`] / [`AbortSignal`] - Cancellation
//! - [`RenderLog`] / [`LogCrateSink`] - Render-scoped logging
//! - [`App`] / [`Module`] - Middleware composition
//! - [`RuntimeFactory`] - Runtime factory trait
//! - [`SharedRenderer`] - Type alias for a shared renderer
//!
//! # Example
//!
//! ```rust,ignore
//! use spa_prerender::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let renderer: SharedRenderer = Arc::new(
//!         Renderer::builder()
//!             .config(RendererConfigBuilder::new().build()?)
//!             .factory(Arc::new(MyEngineFactory))
//!             .assets(Arc::new(MyAssets))
//!             .build()?,
//!     );
//!
//!     let html = renderer.render(Arc::new(LogCrateSink), "Mozilla/5.0", "/", None).await?;
//!     renderer.close().await?;
//!     Ok(())
//! }
//! ```

// Core types
pub use crate::SharedRenderer;
pub use crate::abort::{AbortController, AbortSignal};
pub use crate::config::{RendererConfig, RendererConfigBuilder};
pub use crate::error::{RenderError, Result};
pub use crate::logging::{LogCrateSink, RenderLog};
pub use crate::middleware::{App, Module};
pub use crate::renderer::{Renderer, RendererBuilder};
pub use crate::runtime::RuntimeFactory;
pub use crate::stats::RendererStats;

// Feature-gated exports
#[cfg(feature = "env-config")]
pub use crate::config::env::{asset_root_from_env, from_env, init_renderer};

// Re-export Arc for convenience (commonly needed with SharedRenderer)
pub use std::sync::Arc;
