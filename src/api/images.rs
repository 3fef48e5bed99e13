//! Image serving endpoint
//!
//! GET|HEAD /api/cache/image/{key}            - Serve a cached image by key
//! GET      /api/cache/image/{key}?size=thumb - Serve its 200x200 thumbnail
//!
//! Unknown, empty, malformed, and evicted keys all get the same 404 with no
//! diagnostic headers. When a thumbnail cannot be rendered the original is
//! served instead.

use std::path::Path as StdPath;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{debug, error, warn};

use super::{AppState, ErrorResponse};
use crate::cache::{validate_key, CacheEntry, CacheError};

const X_IMAGE_SIZE: HeaderName = HeaderName::from_static("x-image-size");
const X_IMAGE_PATH: HeaderName = HeaderName::from_static("x-image-path");

const IMMUTABLE: &str = "public, max-age=31536000, immutable";

/// Build the images router
pub fn router() -> Router<AppState> {
    Router::new().route("/api/cache/image/{key}", get(get_image).head(head_image))
}

/// `?size=thumb` selects the thumbnail; any other value is the original
#[derive(Debug, Default, Deserialize)]
struct ImageQuery {
    size: Option<String>,
}

impl ImageQuery {
    fn wants_thumbnail(&self) -> bool {
        self.size.as_deref() == Some("thumb")
    }
}

fn image_not_found() -> Response {
    (StatusCode::NOT_FOUND, ErrorResponse::new("Image not found")).into_response()
}

fn image_headers(content_type: &str, size: u64, path: &StdPath) -> [(HeaderName, String); 5] {
    [
        (header::CONTENT_TYPE, content_type.to_string()),
        (header::CONTENT_LENGTH, size.to_string()),
        (header::CACHE_CONTROL, IMMUTABLE.to_string()),
        (X_IMAGE_SIZE, size.to_string()),
        (X_IMAGE_PATH, path.display().to_string()),
    ]
}

fn read_failed(e: CacheError) -> Response {
    error!("Failed to read cached image: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorResponse::new("Failed to read image"),
    )
        .into_response()
}

fn serve(entry: CacheEntry) -> Response {
    let headers = image_headers(&entry.content_type, entry.data.len() as u64, &entry.path);
    (StatusCode::OK, headers, entry.data).into_response()
}

/// Serve an image by key
async fn get_image(
    Path(key): Path<String>,
    Query(query): Query<ImageQuery>,
    State(state): State<AppState>,
) -> Response {
    if validate_key(&key).is_err() || !state.cache.exists(&key) {
        debug!("Image miss for key {:?}", key);
        return image_not_found();
    }

    if query.wants_thumbnail() {
        match state.cache.thumbnail(&key).await {
            Ok(Some(thumb)) => return serve(thumb),
            Ok(None) => return image_not_found(),
            Err(CacheError::Thumbnail { source, .. }) => {
                warn!("Serving original for {}: {}", key, source);
            }
            Err(e) => return read_failed(e),
        }
    }

    match state.cache.get(&key).await {
        Ok(Some(entry)) => serve(entry),
        Ok(None) => image_not_found(),
        Err(e) => read_failed(e),
    }
}

/// Headers only; the file is checked but never read
async fn head_image(Path(key): Path<String>, State(state): State<AppState>) -> Response {
    match state.cache.locate(&key).await {
        Ok(Some(meta)) => {
            let headers = image_headers(&meta.content_type, meta.size, &meta.path);
            (StatusCode::OK, headers).into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Failed to stat cached image: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
