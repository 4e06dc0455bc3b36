//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `device` - Live pod state
//! - `connection` - Scanning and the connection lifecycle
//! - `history` - Recorded events and statistics
//! - `config` - Runtime configuration
//! - `health` - Service health checks
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod health;
pub mod history;
pub mod openapi;

// Re-export commonly used types
pub use error::{ApiError, ApiResult, ErrorResponse};

// Re-export OpenAPI utilities for the gen-openapi binary
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /device            - Live pod state
/// ├── /connection        - Status, scan, connect, retry, give-up, disconnect, forget
/// ├── /history           - Events and statistics by window
/// ├── /config            - Configuration and threshold updates
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest(
            "/api",
            Router::new()
                .route("/device", get(device::get_device))
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/connection", connection::router())
                .nest("/history", history::router())
                .nest("/config", config::router()),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
