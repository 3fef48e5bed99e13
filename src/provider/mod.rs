//! Upstream generation providers
//!
//! Provides:
//! - `ImageProvider`: the opaque streaming capability the orchestrator drives
//! - A Gemini-compatible streaming HTTP provider
//! - A scripted provider for tests and offline runs
//!
//! A provider call returns a lazy stream of output units. Dropping the
//! stream cancels the upstream call.

mod gemini;
mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::config::{ProviderConfig, ProviderKind};

pub use gemini::GeminiProvider;
pub use scripted::{ScriptStep, ScriptedProvider};

/// One unit of upstream output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamChunk {
    /// Incremental text
    Text(String),
    /// A complete image blob
    Image { data: Vec<u8>, mime_type: String },
}

/// Upstream failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    #[error("provider unreachable: {0}")]
    Unavailable(String),

    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed provider output: {0}")]
    Protocol(String),
}

impl ProviderError {
    /// True when the provider answered but its output could not be used
    pub fn is_protocol(&self) -> bool {
        matches!(self, ProviderError::Protocol(_))
    }
}

/// Lazy sequence of upstream output
pub type UpstreamStream = BoxStream<'static, Result<UpstreamChunk, ProviderError>>;

/// Per-request image settings; unset fields use the provider's configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageOptions {
    pub aspect_ratio: Option<String>,
    pub image_size: Option<String>,
}

impl ImageOptions {
    /// Keep only non-blank values
    pub fn new(aspect_ratio: Option<&str>, image_size: Option<&str>) -> Self {
        let clean = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(String::from);
        Self {
            aspect_ratio: clean(aspect_ratio),
            image_size: clean(image_size),
        }
    }
}

/// One upstream call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRequest {
    pub prompt: String,
    /// Index of this call among the parallel variants of one request
    pub variant: u32,
    pub image: ImageOptions,
}

/// Opaque streaming generation capability
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Short name for logs and status output
    fn name(&self) -> &str;

    /// Start one generation call
    async fn generate(&self, request: ProviderRequest) -> Result<UpstreamStream, ProviderError>;
}

/// Build the provider selected by configuration
pub fn from_config(config: &ProviderConfig) -> Result<Arc<dyn ImageProvider>, ProviderError> {
    match config.kind {
        ProviderKind::Gemini => Ok(Arc::new(GeminiProvider::new(config)?)),
        ProviderKind::Scripted => Ok(Arc::new(ScriptedProvider::placeholder())),
    }
}
