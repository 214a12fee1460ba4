//! Axum framework integration.
//!
//! This module provides a fallback handler that prerenders every path it
//! receives, plus a small statistics endpoint.
//!
//! # Setup
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! spa-prerender = { version = "0.1", features = ["axum-integration"] }
//! axum = "0.8"
//! ```
//!
//! # Basic Usage
//!
//! ```rust,ignore
//! use axum::{Router, routing::get};
//! use spa_prerender::integrations::axum::{render_handler, stats_handler};
//! use spa_prerender::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let renderer: SharedRenderer = Arc::new(
//!         spa_prerender::init_renderer(Arc::new(MyEngineFactory))
//!             .expect("Failed to initialize renderer"),
//!     );
//!
//!     let app = Router::new()
//!         .route("/_ssr/stats", get(stats_handler))
//!         .fallback(render_handler)
//!         .with_state(Arc::clone(&renderer));
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     axum::serve(listener, app)
//!         .with_graceful_shutdown(async { tokio::signal::ctrl_c().await.ok(); })
//!         .await
//!         .unwrap();
//!
//!     renderer.close().await.ok();
//! }
//! ```
//!
//! # Error Responses
//!
//! Failed renders answer with the status from
//! [`RenderError::status_code`] and a JSON body:
//!
//! ```json
//! { "error": "Rendering timed out after 60s waiting for the page to settle", "code": "RENDER_TIMEOUT" }
//! ```

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{Html, IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::SharedRenderer;
use crate::error::RenderError;
use crate::logging::LogCrateSink;
use crate::stats::RendererStats;

/// Type alias for Axum `State` extractor with the shared renderer.
pub type RendererState = State<SharedRenderer>;

/// JSON error body returned for failed renders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,

    /// Machine-readable error code (see [`RenderError::error_code`]).
    pub code: String,
}

impl From<&RenderError> for ErrorResponse {
    fn from(err: &RenderError) -> Self {
        Self {
            error: err.to_string(),
            code: err.error_code().to_string(),
        }
    }
}

impl From<RenderError> for ErrorResponse {
    fn from(err: RenderError) -> Self {
        Self::from(&err)
    }
}

/// JSON form of [`RendererStats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    /// Environments currently cached.
    pub environments: usize,
    /// Environment constructions attempted.
    pub constructions: u64,
    /// Renders that produced markup.
    pub renders_succeeded: u64,
    /// Renders that failed.
    pub renders_failed: u64,
    /// Renders queued or running.
    pub renders_in_flight: usize,
}

impl From<RendererStats> for StatsResponse {
    fn from(stats: RendererStats) -> Self {
        Self {
            environments: stats.environments,
            constructions: stats.constructions,
            renders_succeeded: stats.renders_succeeded,
            renders_failed: stats.renders_failed,
            renders_in_flight: stats.renders_in_flight,
        }
    }
}

impl IntoResponse for RenderError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

/// Prerender the request path for the request's `User-Agent`.
///
/// Intended as the router's fallback. Page messages go to the `log` facade
/// through [`LogCrateSink`].
pub async fn render_handler(
    State(renderer): RendererState,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Html<String>, RenderError> {
    let identity = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    log::debug!("Prerendering {} for '{}'", uri.path(), identity);
    let markup = renderer
        .render(Arc::new(LogCrateSink), identity, uri.path(), None)
        .await?;
    Ok(Html(markup))
}

/// Current renderer statistics.
pub async fn stats_handler(State(renderer): RendererState) -> Json<StatsResponse> {
    Json(StatsResponse::from(renderer.stats()))
}
