//! Scripted provider
//!
//! Replays a fixed sequence of steps for every call. Used by tests and by
//! `--provider scripted` for running the server without network access.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use super::{ImageProvider, ProviderError, ProviderRequest, UpstreamChunk, UpstreamStream};

/// 1x1 PNG served by the placeholder script
const PLACEHOLDER_PNG: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

/// One scripted action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Yield a text delta
    Text(String),
    /// Yield an image
    Image { data: Vec<u8>, mime_type: String },
    /// Yield an error and keep going
    Fail(ProviderError),
    /// Sleep before the next step
    Delay(Duration),
    /// Never yield again
    Stall,
}

impl ScriptStep {
    pub fn text(content: &str) -> Self {
        ScriptStep::Text(content.to_string())
    }

    pub fn png(data: &[u8]) -> Self {
        ScriptStep::Image {
            data: data.to_vec(),
            mime_type: "image/png".to_string(),
        }
    }
}

/// Decrements the live-stream counter when a stream is dropped
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Provider that replays scripts
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    /// Scripts indexed by variant (wrapping)
    scripts: Vec<Vec<ScriptStep>>,
    start_error: Option<ProviderError>,
    calls: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<ProviderRequest>>>,
}

impl ScriptedProvider {
    /// Every call replays `steps`
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self::per_variant(vec![steps])
    }

    /// Variant `n` replays `scripts[n % scripts.len()]`
    pub fn per_variant(scripts: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            scripts,
            start_error: None,
            calls: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every call fails before producing output
    pub fn failing(error: ProviderError) -> Self {
        Self {
            start_error: Some(error),
            ..Self::new(Vec::new())
        }
    }

    /// Offline stand-in: a short caption and a 1x1 PNG
    pub fn placeholder() -> Self {
        let png = BASE64.decode(PLACEHOLDER_PNG).unwrap_or_default();
        Self::new(vec![
            ScriptStep::text("Placeholder illustration."),
            ScriptStep::png(&png),
        ])
    }

    /// Number of `generate` calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, in call order
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().clone()
    }

    /// Number of output streams not yet dropped
    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn script_for(&self, variant: u32) -> Vec<ScriptStep> {
        if self.scripts.is_empty() {
            return Vec::new();
        }
        self.scripts[variant as usize % self.scripts.len()].clone()
    }
}

#[async_trait]
impl ImageProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: ProviderRequest) -> Result<UpstreamStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        if let Some(error) = &self.start_error {
            return Err(error.clone());
        }

        let steps = self.script_for(request.variant).into_iter();
        let guard = LiveGuard::new(self.live.clone());

        let stream = stream::unfold((steps, guard), |(mut steps, guard)| async move {
            loop {
                let item = match steps.next()? {
                    ScriptStep::Text(content) => Ok(UpstreamChunk::Text(content)),
                    ScriptStep::Image { data, mime_type } => {
                        Ok(UpstreamChunk::Image { data, mime_type })
                    }
                    ScriptStep::Fail(error) => Err(error),
                    ScriptStep::Delay(duration) => {
                        tokio::time::sleep(duration).await;
                        continue;
                    }
                    ScriptStep::Stall => {
                        futures::future::pending::<()>().await;
                        continue;
                    }
                };
                return Some((item, (steps, guard)));
            }
        });
        Ok(stream.boxed())
    }
}
