//! Stream event protocol
//!
//! Every event serializes as a JSON object carrying its own `type`, so a
//! record is self-describing without any preceding `event:` line.

use serde::{Deserialize, Serialize};

use crate::provider::ProviderError;

/// Route prefix under which cached images are served
pub const IMAGE_ROUTE_PREFIX: &str = "/api/cache/image/";

/// Retrieval path for a cache key
pub fn image_url(key: &str) -> String {
    format!("{}{}", IMAGE_ROUTE_PREFIX, key)
}

/// Failure category carried by `error` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UpstreamUnavailable,
    UpstreamProtocol,
    CacheWriteFailure,
    Timeout,
}

impl From<&ProviderError> for ErrorKind {
    fn from(error: &ProviderError) -> Self {
        if error.is_protocol() {
            ErrorKind::UpstreamProtocol
        } else {
            ErrorKind::UpstreamUnavailable
        }
    }
}

/// Trailing aggregate for one stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSummary {
    pub text_events: u32,
    pub image_events: u32,
    pub error_events: u32,
    pub variants: u32,
    pub elapsed_ms: u64,
}

/// One unit of the ordered protocol sent to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Stream established
    Connected,
    /// Incremental text, concatenable in order
    Text { content: String },
    /// An image was cached under `key`
    Image { key: String, url: String },
    /// A failure scoped to this stream
    Error { error: String, kind: ErrorKind },
    /// Generation finished
    Complete,
    /// Aggregate counts and timing
    Final { summary: GenerationSummary },
}

impl StreamEvent {
    /// Image event with its retrieval path
    pub fn image(key: String) -> Self {
        let url = image_url(&key);
        StreamEvent::Image { key, url }
    }

    pub fn error(kind: ErrorKind, error: impl Into<String>) -> Self {
        StreamEvent::Error {
            error: error.into(),
            kind,
        }
    }

    /// Event name, identical to the serialized `type`
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Connected => "connected",
            StreamEvent::Text { .. } => "text",
            StreamEvent::Image { .. } => "image",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Complete => "complete",
            StreamEvent::Final { .. } => "final",
        }
    }
}
