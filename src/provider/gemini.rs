//! Gemini-compatible streaming provider
//!
//! Calls `models/{model}:streamGenerateContent?alt=sse` asking for both text
//! and image modalities. Each SSE `data:` payload is a partial response whose
//! `candidates[].content.parts[]` carry either `text` or `inlineData`
//! (base64 image bytes).

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::{self, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ImageProvider, ProviderError, ProviderRequest, UpstreamChunk, UpstreamStream};
use crate::config::ProviderConfig;

/// Generation request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationSettings<'a>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationSettings<'a> {
    response_modalities: [&'static str; 2],
    image_config: ImageSettings<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageSettings<'a> {
    aspect_ratio: &'a str,
    image_size: &'a str,
}

/// One streamed response payload
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
    /// Reasoning text, never forwarded
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<u16>,
    message: String,
}

/// Turn one SSE payload into output units
///
/// Payloads that are not valid JSON are skipped.
fn parse_payload(data: &str) -> Vec<Result<UpstreamChunk, ProviderError>> {
    let response: StreamResponse = match serde_json::from_str(data) {
        Ok(r) => r,
        Err(e) => {
            warn!("Skipping malformed provider payload: {}", e);
            return Vec::new();
        }
    };

    if let Some(error) = response.error {
        return vec![Err(match error.code {
            Some(status) => ProviderError::Rejected {
                status,
                message: error.message,
            },
            None => ProviderError::Unavailable(error.message),
        })];
    }

    let mut chunks = Vec::new();
    for part in response
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
    {
        if part.thought {
            continue;
        }
        if let Some(text) = part.text.filter(|t| !t.is_empty()) {
            chunks.push(Ok(UpstreamChunk::Text(text)));
        }
        if let Some(inline) = part.inline_data {
            chunks.push(
                BASE64
                    .decode(inline.data.as_bytes())
                    .map(|data| UpstreamChunk::Image {
                        data,
                        mime_type: inline.mime_type,
                    })
                    .map_err(|e| ProviderError::Protocol(format!("invalid image data: {}", e))),
            );
        }
    }
    chunks
}

/// Decode a streamed response body into output units
///
/// Transport failures end up as `Unavailable`; bytes that do not form a valid
/// event stream are a `Protocol` error.
fn decode_body<S, B, E>(body: S) -> UpstreamStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    body.eventsource()
        .flat_map(|item| {
            let chunks = match item {
                Ok(event) if event.data.is_empty() => Vec::new(),
                Ok(event) => parse_payload(&event.data),
                Err(EventStreamError::Transport(e)) => {
                    vec![Err(ProviderError::Unavailable(e.to_string()))]
                }
                Err(e) => vec![Err(ProviderError::Protocol(e.to_string()))],
            };
            stream::iter(chunks)
        })
        .boxed()
}

/// Gemini-compatible streaming client
#[derive(Debug)]
pub struct GeminiProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    aspect_ratio: String,
    image_size: String,
}

impl GeminiProvider {
    /// Create a provider from configuration
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            aspect_ratio: config.aspect_ratio.clone(),
            image_size: config.image_size.clone(),
        })
    }

    /// Check if API key is configured
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: ProviderRequest) -> Result<UpstreamStream, ProviderError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::NotConfigured("API key missing".to_string()))?;

        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationSettings {
                response_modalities: ["TEXT", "IMAGE"],
                image_config: ImageSettings {
                    aspect_ratio: request
                        .image
                        .aspect_ratio
                        .as_deref()
                        .unwrap_or(&self.aspect_ratio),
                    image_size: request.image.image_size.as_deref().unwrap_or(&self.image_size),
                },
            },
        };

        debug!(
            "Sending generation request for variant {} to {}",
            request.variant, self.model
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            warn!("Provider API error: {} - {}", status, message);
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("error").to_string(),
            });
        }

        Ok(decode_body(response.bytes_stream()))
    }
}
