//! # spa-prerender
//!
//! Server-side prerendering of single-page applications.
//!
//! This crate turns a client-side application into static markup by running
//! it inside an emulated document runtime, waiting until the page has
//! stopped doing asynchronous work, and serializing the result.
//!
//! ## Features
//!
//! - **Quiescence Detection**: Every timer, request, image load and resource
//!   fetch is counted; a render completes only after a pass with nothing
//!   outstanding and nothing new started
//! - **Environment Reuse**: One runtime per client identity, constructed once
//!   and reused across paths
//! - **FIFO Scheduling**: Renders against one environment never overlap;
//!   different environments render concurrently
//! - **Resource Interception**: An ordered handler chain serves application
//!   assets, `data:` and `blob:` URLs, placeholder images and blocked URLs
//! - **Composable Middleware**: Modules with per-environment state layer
//!   resource handlers and init hooks in declared order
//! - **Cancellation**: Renders honour an [`AbortSignal`] and a configurable
//!   timeout
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │         Your Web Application                │
//! │         (Axum / any async server)           │
//! └─────────────────┬───────────────────────────┘
//!                   │ render(log, identity, path, signal)
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │                 Renderer                    │
//! │ ┌─────────────────────────────────────────┐ │
//! │ │   Environments (one per identity)       │ │
//! │ │   {identity → FIFO queue + runtime}     │ │
//! │ └─────────────────────────────────────────┘ │
//! │ ┌─────────────────────────────────────────┐ │
//! │ │   Settle loop + SettlementTracker       │ │
//! │ └─────────────────────────────────────────┘ │
//! │ ┌─────────────────────────────────────────┐ │
//! │ │   Resource chain + middleware           │ │
//! │ └─────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │   Document runtime (RuntimeFactory impl)    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use spa_prerender::prelude::*;
//! use spa_prerender::resources::app::DirectoryAssets;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let renderer = Renderer::builder()
//!         .config(
//!             RendererConfigBuilder::new()
//!                 .base_url("https://app.example.com/")
//!                 .build()?,
//!         )
//!         .factory(Arc::new(MyEngineFactory))
//!         .assets(Arc::new(DirectoryAssets::new("build/web")))
//!         .build()?;
//!
//!     let signal = AbortSignal::timeout(std::time::Duration::from_secs(10));
//!     let html = renderer
//!         .render(Arc::new(LogCrateSink), "Mozilla/5.0 (Linux; Android 14)", "/pricing", Some(&signal))
//!         .await?;
//!     println!("{}", html);
//!
//!     renderer.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Configuration
//!
//! When the `env-config` feature is enabled, the renderer can be configured
//! from environment variables (loaded from an `app.env` file or the system
//! environment):
//!
//! | Variable | Type | Default | Description |
//! |----------|------|---------|-------------|
//! | `SSR_BASE_URL` | String | `http://localhost/` | URL the application is served from |
//! | `SSR_INDEX_DOCUMENT` | String | `index.html` | Initial document asset |
//! | `SSR_BLOCK_LIST` | String | empty | Comma-separated URLs answered with empty bodies |
//! | `SSR_RENDER_TIMEOUT_SECONDS` | u64 | 60 | Settle timeout, 0 disables |
//! | `SSR_TIMER_DEFER_THRESHOLD_MS` | u64 | none | Timers at or above this never run |
//! | `SSR_TIMER_MAX_DELAY_MS` | u64 | none | Cap for remaining timer delays |
//! | `SSR_ASSET_ROOT` | Path | required | Directory of the compiled application |
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `env-config` | Enable environment-based configuration (default) |
//! | `http-fetch` | Fetch cross-origin resources with `reqwest` (default) |
//! | `axum-integration` | Axum fallback handler |
//! | `test-utils` | Enable the scripted mock runtime for testing |
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, RenderError>`](Result):
//!
//! ```rust,ignore
//! use spa_prerender::RenderError;
//!
//! match renderer.render(log, identity, path, None).await {
//!     Ok(html) => { /* serve it */ }
//!     Err(RenderError::Closed) => { /* shutting down */ }
//!     Err(RenderError::Aborted | RenderError::Timeout(_)) => { /* fall back to client rendering */ }
//!     Err(e) => eprintln!("Render failed: {}", e),
//! }
//! ```
//!
//! ## Testing
//!
//! Enable the `test-utils` feature and use
//! [`MockRuntimeFactory`](runtime::mock::MockRuntimeFactory), whose page
//! scripts are Rust closures:
//!
//! ```rust,ignore
//! use spa_prerender::runtime::mock::{MockApp, MockRuntimeFactory};
//!
//! let app = MockApp::new().route("/", |page| page.set_body("<h1>Home</h1>"));
//! let renderer = Renderer::builder()
//!     .factory(Arc::new(MockRuntimeFactory::with_app(app)))
//!     .assets(Arc::new(MemoryAssets::new().with("index.html", INDEX)))
//!     .build()?;
//! ```

#![doc(html_root_url = "https://docs.rs/spa-prerender/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// Modules
// ============================================================================

pub mod abort;
pub mod config;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod markup;
pub mod middleware;
pub mod prelude;
pub mod renderer;
pub mod resources;
pub mod runtime;
pub mod settle;
pub mod stats;
pub mod tracker;

// Internal modules (not publicly exposed)
pub(crate) mod environment;

// ============================================================================
// Feature-gated modules
// ============================================================================

/// Web framework integrations.
///
/// Enable `axum-integration` to use them.
#[cfg(feature = "axum-integration")]
pub mod integrations;

// ============================================================================
// Re-exports (Public API)
// ============================================================================

// Core types
pub use abort::{AbortController, AbortSignal};
pub use config::{RendererConfig, RendererConfigBuilder};
pub use error::{RenderError, Result};
pub use logging::{LogCrateSink, RenderLog};
pub use middleware::{App, Middleware, Module};
pub use renderer::{Renderer, RendererBuilder};
pub use runtime::{Runtime, RuntimeFactory};
pub use settle::{Settlement, settle};
pub use stats::RendererStats;
pub use tracker::SettlementTracker;

// Feature-gated re-exports
#[cfg(feature = "env-config")]
pub use config::env::{asset_root_from_env, from_env, init_renderer};

// ============================================================================
// Convenience type aliases
// ============================================================================

/// Shared renderer type for web frameworks.
///
/// This is the recommended type for sharing a renderer across handlers.
pub type SharedRenderer = std::sync::Arc<Renderer>;
