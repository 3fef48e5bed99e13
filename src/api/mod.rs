//! HTTP API module - REST endpoints and the generation stream

mod batch;
mod cache;
mod images;
mod stream;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::{CacheStats, ImageCache};
use crate::generate::Orchestrator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ImageCache>,
    pub orchestrator: Orchestrator,
    pub generation: crate::config::GenerationConfig,
    /// Events buffered per stream
    pub stream_buffer: usize,
    pub started_at: Instant,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/status", get(status))
        .merge(images::router())
        .merge(cache::router())
        .merge(stream::router())
        .merge(batch::router())
        .fallback(not_found)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

/// Error response
#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub(crate) fn new(error: impl Into<String>) -> Json<Self> {
        Json(Self {
            error: error.into(),
        })
    }
}

/// Fallback for unknown routes
async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, ErrorResponse::new("Not found"))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    timestamp: String,
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        service: "illumd",
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    version: &'static str,
    uptime_secs: u64,
    provider: String,
    cache: CacheStats,
    timestamp: String,
}

/// Process and cache status
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        provider: state.orchestrator.provider_name().to_string(),
        cache: state.cache.stats(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
