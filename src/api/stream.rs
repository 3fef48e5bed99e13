//! Generation stream endpoint
//!
//! POST /api/generate/stream - Run one generation and stream its events
//!
//! The response is `text/event-stream`. Each event is written as one record:
//! an `event:` line naming it and a `data:` line with the JSON event, which
//! carries its own `type`. The orchestrator runs in its own task and feeds a
//! bounded channel; when the client disconnects the body stream is dropped,
//! the channel closes, and the orchestrator cancels upstream work.

use std::convert::Infallible;

use axum::{
    extract::State,
    http::{HeaderName, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::post,
    Json, Router,
};
use futures::stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info_span, warn, Instrument};

use super::{AppState, ErrorResponse};
use crate::generate::{GenerationRequest, StreamEvent};
use crate::provider::ImageOptions;

/// Build the stream router
pub fn router() -> Router<AppState> {
    Router::new().route("/api/generate/stream", post(generate_stream))
}

/// Stream request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamRequest {
    /// Prompt text (typically distilled from a paper)
    paper_text: String,
    #[serde(default)]
    style: Option<String>,
    #[serde(default)]
    variants: Option<u32>,
    #[serde(default)]
    aspect_ratio: Option<String>,
    #[serde(default)]
    image_size: Option<String>,
}

/// Frame one event as an SSE record
fn to_sse(event: &StreamEvent) -> Event {
    match Event::default().event(event.name()).json_data(event) {
        Ok(frame) => frame,
        Err(e) => {
            // Serializing these enums cannot fail; fall back to a bare error record
            warn!("Failed to encode stream event: {}", e);
            Event::default()
                .event("error")
                .data(r#"{"type":"error","error":"encoding failed","kind":"upstream_protocol"}"#)
        }
    }
}

/// POST /api/generate/stream
async fn generate_stream(
    State(state): State<AppState>,
    Json(body): Json<StreamRequest>,
) -> Response {
    let request = match GenerationRequest::new(
        &body.paper_text,
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

    let (tx, rx) = mpsc::channel::<StreamEvent>(state.stream_buffer);
    let request_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(
        async move {
            orchestrator.run(request, tx).await;
        }
        .instrument(info_span!("generate", request_id = %request_id)),
    );

    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok::<_, Infallible>(to_sse(&event)), rx))
    });

    (
        [(HeaderName::from_static("x-accel-buffering"), "no")],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response()
}
