//! Web framework integrations.
//!
//! This module provides optional integrations with Rust web frameworks,
//! making it easier to put a [`Renderer`](crate::Renderer) in front of a
//! single-page application.
//!
//! # Available Integrations
//!
//! | Framework | Feature Flag | Module |
//! |-----------|--------------|--------|
//! | Axum | `axum-integration` | `axum` |
//!
//! # Enabling Integrations
//!
//! Add the desired feature to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! spa-prerender = { version = "0.1", features = ["axum-integration"] }
//! ```
//!
//! # Common Pattern
//!
//! 1. Build a `Renderer` during application startup
//! 2. Wrap it in an `Arc` ([`SharedRenderer`](crate::SharedRenderer))
//! 3. Register it with your framework's state management
//! 4. Render the request path for the request's `User-Agent`
//! 5. Call `close()` on shutdown

#[cfg(feature = "axum-integration")]
pub mod axum;
