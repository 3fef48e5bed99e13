//! Non-streaming generation endpoint
//!
//! POST /api/generate/batch - Run one generation and answer with the aggregate
//!
//! Drives the same orchestrator as the stream endpoint and folds its events
//! into a single JSON report. Dropping the request cancels the run.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, info_span, Instrument};

use super::{AppState, ErrorResponse};
use crate::generate::{GenerationReport, GenerationRequest, StreamEvent};
use crate::provider::ImageOptions;

/// Build the batch router
pub fn router() -> Router<AppState> {
    Router::new().route("/api/generate/batch", post(generate_batch))
}

/// Batch request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchRequest {
    #[serde(default, alias = "paperText")]
    prompt: String,
    #[serde(default)]
    style: Option<String>,
    #[serde(default)]
    variants: Option<u32>,
    #[serde(default)]
    aspect_ratio: Option<String>,
    #[serde(default)]
    image_size: Option<String>,
}

/// POST /api/generate/batch
async fn generate_batch(
    State(state): State<AppState>,
    Json(body): Json<BatchRequest>,
) -> Response {
    let request = match GenerationRequest::new(
        &body.prompt,
        body.style.as_deref(),
        body.variants,
        &state.generation,
    ) {
        Ok(request) => request.with_image(ImageOptions::new(
            body.aspect_ratio.as_deref(),
            body.image_size.as_deref(),
        )),
        Err(e) => {
            return (StatusCode::BAD_REQUEST, ErrorResponse::new(e.to_string())).into_response()
        }
    };

    let (tx, mut rx) = mpsc::channel::<StreamEvent>(state.stream_buffer);
    let request_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    let run = state
        .orchestrator
        .run(request, tx)
        .instrument(info_span!("batch", request_id = %request_id));
    let drain = async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    };

    let (outcome, events) = tokio::join!(run, drain);
    let report = GenerationReport::from_events(events);
    info!(
        "Batch generation {} finished ({:?}): {} images",
        request_id,
        outcome,
        report.cache_keys.len()
    );

    Json(report).into_response()
}
