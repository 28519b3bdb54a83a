//! Relay HTTP surface
//!
//! HTTP layer for the relay, built with Axum.
//!
//! # Endpoints
//!
//! ## WebSocket
//! - `GET /ws` - Subscriber connection
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! ## Static
//! - `GET /audio/*` - Files from `audio_dir`, when configured
//!
//! # Example
//!
//! ```rust,ignore
//! use msg_relay::api::{build_router, AppState};
//!
//! let router = build_router(AppState::default());
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::websocket::websocket_handler;

/// Build the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let mut router = Router::new()
        .route("/ws", get(websocket_handler))
        .nest("/health", health_routes);

    if let Some(dir) = &state.config.audio_dir {
        tracing::info!("Serving audio files from {:?}", dir);
        router = router.nest_service("/audio", ServeDir::new(dir));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}
