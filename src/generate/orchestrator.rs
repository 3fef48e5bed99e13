//! Generation orchestrator
//!
//! One run per stream request:
//! 1. Emit `connected`
//! 2. Start every variant against the provider and merge their output
//! 3. Forward text, cache each image and emit `image`, report failures
//! 4. Emit `complete`, then a `final` summary
//!
//! A single loop owns the event sender, so events leave in the order they are
//! produced even though variants run concurrently. The loop stops early on
//! the deadline (reported to the client) or when the client goes away
//! (silent). Either way the in-flight provider streams are dropped, which
//! cancels them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::events::{ErrorKind, GenerationSummary, StreamEvent};
use crate::cache::ImageCache;
use crate::config::GenerationConfig;
use crate::provider::{ImageOptions, ImageProvider, ProviderRequest, UpstreamChunk};

/// Request validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("prompt exceeds {max} characters")]
    PromptTooLong { max: usize },
}

/// A validated generation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    prompt: String,
    style: Option<String>,
    variants: u32,
    image: ImageOptions,
}

impl GenerationRequest {
    /// Validate a prompt and resolve defaults against `limits`
    ///
    /// The variant count is clamped to `1..=limits.max_variants`.
    pub fn new(
        prompt: &str,
        style: Option<&str>,
        variants: Option<u32>,
        limits: &GenerationConfig,
    ) -> Result<Self, RequestError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(RequestError::EmptyPrompt);
        }
        if prompt.chars().count() > limits.max_prompt_chars {
            return Err(RequestError::PromptTooLong {
                max: limits.max_prompt_chars,
            });
        }

        Ok(Self {
            prompt: prompt.to_string(),
            style: style.map(str::trim).filter(|s| !s.is_empty()).map(String::from),
            variants: variants
                .unwrap_or(limits.default_variants)
                .clamp(1, limits.max_variants.max(1)),
            image: ImageOptions::default(),
        })
    }

    /// Override the provider's image settings for this request
    pub fn with_image(mut self, image: ImageOptions) -> Self {
        self.image = image;
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn style(&self) -> Option<&str> {
        self.style.as_deref()
    }

    pub fn variants(&self) -> u32 {
        self.variants
    }

    pub fn image(&self) -> &ImageOptions {
        &self.image
    }

    /// Text sent upstream
    fn provider_prompt(&self) -> String {
        match &self.style {
            Some(style) => format!("{}\n\nStyle: {}", self.prompt, style),
            None => self.prompt.clone(),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every variant finished without an upstream error
    Completed,
    /// At least one upstream call failed
    Failed,
    /// The deadline expired
    TimedOut,
    /// The client went away
    Cancelled,
}

/// The event receiver was dropped
struct Disconnected;

/// Single writer for one stream, counting what it sends
struct Emitter {
    tx: mpsc::Sender<StreamEvent>,
    summary: GenerationSummary,
}

impl Emitter {
    async fn emit(&mut self, event: StreamEvent) -> Result<(), Disconnected> {
        match &event {
            StreamEvent::Text { .. } => self.summary.text_events += 1,
            StreamEvent::Image { .. } => self.summary.image_events += 1,
            StreamEvent::Error { .. } => self.summary.error_events += 1,
            _ => {}
        }
        self.tx.send(event).await.map_err(|_| Disconnected)
    }
}

/// Drives a provider and turns its output into stream events
#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn ImageProvider>,
    cache: Arc<ImageCache>,
    timeout: Duration,
}

impl Orchestrator {
    /// Create an orchestrator; `timeout` bounds each whole run
    pub fn new(provider: Arc<dyn ImageProvider>, cache: Arc<ImageCache>, timeout: Duration) -> Self {
        Self {
            provider,
            cache,
            timeout,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run one request, sending events to `events` until a terminal event
    ///
    /// Returns once the stream is finished or the receiver has been dropped.
    pub async fn run(&self, request: GenerationRequest, events: mpsc::Sender<StreamEvent>) -> Outcome {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut emitter = Emitter {
            tx: events,
            summary: GenerationSummary {
                variants: request.variants,
                ..Default::default()
            },
        };

        info!(
            "Starting generation with {} variant(s) via {}",
            request.variants,
            self.provider.name()
        );

        let result = match emitter.emit(StreamEvent::Connected).await {
            Ok(()) => self.stream_variants(&request, &mut emitter, deadline).await,
            Err(Disconnected) => Err(Disconnected),
        };
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(Disconnected) => {
                info!("Client disconnected, generation cancelled");
                return Outcome::Cancelled;
            }
        };

        match self.finish(&mut emitter, outcome, started).await {
            Ok(()) => {
                info!(
                    "Generation finished ({:?}): {} images, {} errors in {}ms",
                    outcome,
                    emitter.summary.image_events,
                    emitter.summary.error_events,
                    emitter.summary.elapsed_ms
                );
                outcome
            }
            Err(Disconnected) => Outcome::Cancelled,
        }
    }

    /// Merge all variants and forward their output until exhausted
    async fn stream_variants(
        &self,
        request: &GenerationRequest,
        emitter: &mut Emitter,
        deadline: tokio::time::Instant,
    ) -> Result<Outcome, Disconnected> {
        let prompt = request.provider_prompt();
        let variants = (0..request.variants).map(|variant| {
            let provider = self.provider.clone();
            let call = ProviderRequest {
                prompt: prompt.clone(),
                variant,
                image: request.image.clone(),
            };
            stream::once(async move { provider.generate(call).await })
                .flat_map(|started| match started {
                    Ok(upstream) => upstream,
                    Err(e) => stream::once(future::ready(Err(e))).boxed(),
                })
                .boxed()
        });
        let mut merged = stream::select_all(variants);
        let mut failed = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = emitter.tx.closed() => return Err(Disconnected),
                _ = tokio::time::sleep_until(deadline) => {
                    warn!("Generation deadline of {:?} expired", self.timeout);
                    return Ok(Outcome::TimedOut);
                }
                next = merged.next() => next,
            };

            match next {
                Some(Ok(UpstreamChunk::Text(content))) => {
                    emitter.emit(StreamEvent::Text { content }).await?;
                }
                Some(Ok(UpstreamChunk::Image { data, mime_type })) => {
                    self.store_image(emitter, &data, &mime_type).await?;
                }
                Some(Err(e)) => {
                    warn!("Upstream generation failed: {}", e);
                    failed = true;
                    emitter
                        .emit(StreamEvent::error(ErrorKind::from(&e), e.to_string()))
                        .await?;
                }
                None => {
                    return Ok(if failed {
                        Outcome::Failed
                    } else {
                        Outcome::Completed
                    })
                }
            }
        }
    }

    /// Cache one image; a failed write becomes an `error` event
    async fn store_image(
        &self,
        emitter: &mut Emitter,
        data: &[u8],
        mime_type: &str,
    ) -> Result<(), Disconnected> {
        match self.cache.put(data, mime_type).await {
            Ok(key) => {
                debug!("Cached generated image {}", key);
                emitter.emit(StreamEvent::image(key)).await
            }
            Err(e) => {
                warn!("Failed to cache generated image: {}", e);
                emitter
                    .emit(StreamEvent::error(ErrorKind::CacheWriteFailure, e.to_string()))
                    .await
            }
        }
    }

    /// Emit the terminal events
    async fn finish(
        &self,
        emitter: &mut Emitter,
        outcome: Outcome,
        started: Instant,
    ) -> Result<(), Disconnected> {
        if outcome == Outcome::TimedOut {
            emitter
                .emit(StreamEvent::error(
                    ErrorKind::Timeout,
                    format!("generation timed out after {}ms", self.timeout.as_millis()),
                ))
                .await?;
        }
        emitter.emit(StreamEvent::Complete).await?;

        emitter.summary.elapsed_ms = started.elapsed().as_millis() as u64;
        let summary = emitter.summary.clone();
        emitter.emit(StreamEvent::Final { summary }).await
    }
}
