//! Cache introspection and maintenance
//!
//! GET  /api/debug/cache        - List cached files
//! GET  /api/cache/info/{key}   - Metadata for one image
//! POST /api/cache/cleanup      - Remove images older than a cutoff

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{AppState, ErrorResponse};
use crate::generate::image_url;

/// Build the cache router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/debug/cache", get(debug_cache))
        .route("/api/cache/info/{key}", get(image_info))
        .route("/api/cache/cleanup", post(cleanup))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DebugCacheResponse {
    cache_dir: String,
    images_dir: String,
    file_count: usize,
    files: Vec<DebugFile>,
}

#[derive(Debug, Serialize)]
struct DebugFile {
    file: String,
    size: u64,
    modified: DateTime<Utc>,
}

/// GET /api/debug/cache
/// Snapshot of the cache index
async fn debug_cache(State(state): State<AppState>) -> impl IntoResponse {
    let files: Vec<DebugFile> = state
        .cache
        .list()
        .into_iter()
        .map(|entry| DebugFile {
            file: entry.file,
            size: entry.size,
            modified: entry.created_at,
        })
        .collect();

    Json(DebugCacheResponse {
        cache_dir: state.cache.root().display().to_string(),
        images_dir: state.cache.images_dir().display().to_string(),
        file_count: files.len(),
        files,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageInfoResponse {
    key: String,
    url: String,
    thumbnail_url: String,
    size: u64,
    content_type: String,
    created_at: DateTime<Utc>,
}

/// GET /api/cache/info/{key}
async fn image_info(Path(key): Path<String>, State(state): State<AppState>) -> Response {
    match state.cache.metadata(&key) {
        Some(meta) => Json(ImageInfoResponse {
            url: image_url(&meta.key),
            thumbnail_url: format!("{}?size=thumb", image_url(&meta.key)),
            key: meta.key,
            size: meta.size,
            content_type: meta.content_type,
            created_at: meta.created_at,
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            ErrorResponse::new("Image not found in cache"),
        )
            .into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CleanupRequest {
    max_age_hours: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CleanupResponse {
    success: bool,
    deleted_files: usize,
    freed_space: u64,
}

const DEFAULT_MAX_AGE_HOURS: f64 = 24.0;

/// POST /api/cache/cleanup
/// Body is optional; `maxAgeHours` defaults to 24
async fn cleanup(
    State(state): State<AppState>,
    body: Option<Json<CleanupRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let hours = request.max_age_hours.unwrap_or(DEFAULT_MAX_AGE_HOURS);
    let Ok(max_age) = Duration::try_from_secs_f64(hours * 3600.0) else {
        return (
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("maxAgeHours must be a non-negative number"),
        )
            .into_response();
    };

    let report = state.cache.cleanup(max_age).await;
    info!(
        "Cleanup requested (max age {}h): {} files removed",
        hours,
        report.deleted_files.len()
    );

    Json(CleanupResponse {
        success: true,
        deleted_files: report.deleted_files.len(),
        freed_space: report.freed_space,
    })
    .into_response()
}
