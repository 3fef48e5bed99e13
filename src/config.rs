//! Server configuration
//!
//! Layered with figment, later layers winning:
//! 1. Built-in defaults
//! 2. TOML file (`illumd.toml` unless another path is given)
//! 3. `ILLUMD_` environment variables, nested keys split on `__`
//!    (e.g. `ILLUMD_CACHE__DIR=/var/cache/illumd`)
//!
//! CLI flags are applied on top by the binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::RetentionPolicy;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "illumd.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("invalid configuration: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub generation: GenerationConfig,
    pub provider: ProviderConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Events buffered per stream before generation is throttled
    pub stream_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 2983)),
            stream_buffer: 16,
        }
    }
}

/// Image cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub max_entries: usize,
    pub max_bytes: u64,
    pub ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let policy = RetentionPolicy::default();
        Self {
            dir: PathBuf::from("./cache"),
            max_entries: policy.max_entries,
            max_bytes: policy.max_bytes,
            ttl_secs: None,
        }
    }
}

impl CacheConfig {
    /// Retention policy for the cache; a TTL of zero disables expiry
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_entries: self.max_entries,
            max_bytes: self.max_bytes,
            ttl: self.ttl_secs.filter(|secs| *secs > 0).map(Duration::from_secs),
        }
    }
}

/// Generation limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Deadline for one whole stream
    pub timeout_secs: u64,
    pub default_variants: u32,
    pub max_variants: u32,
    pub max_prompt_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            default_variants: 4,
            max_variants: 8,
            max_prompt_chars: 50_000,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which upstream provider to drive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Gemini-compatible `streamGenerateContent` endpoint
    #[default]
    Gemini,
    /// Built-in placeholder output, no network
    Scripted,
}

impl ProviderKind {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<ProviderKind> {
        match s.to_lowercase().as_str() {
            "gemini" | "aihubmix" => Some(ProviderKind::Gemini),
            "scripted" | "offline" | "placeholder" => Some(ProviderKind::Scripted),
            _ => None,
        }
    }
}

/// Upstream provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub aspect_ratio: String,
    pub image_size: String,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Gemini,
            api_key: None,
            base_url: "https://aihubmix.com/gemini/v1beta".to_string(),
            model: "gemini-3-pro-image-preview".to_string(),
            aspect_ratio: "1:1".to_string(),
            image_size: "1k".to_string(),
            request_timeout_secs: 300,
        }
    }
}

impl Config {
    /// Build the layered figment without extracting it
    pub fn figment(path: Option<&Path>) -> Figment {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("ILLUMD_").split("__"))
    }

    /// Load and validate configuration
    ///
    /// Falls back to `AIHUBMIX_API_KEY` when no provider key is configured.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_figment(Self::figment(path))?;
        if config.provider.api_key.is_none() {
            config.provider.api_key = std::env::var("AIHUBMIX_API_KEY").ok();
        }
        Ok(config)
    }

    /// Extract and validate configuration from a figment
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };

        if self.server.stream_buffer == 0 {
            return invalid("server.stream_buffer", "must be at least 1");
        }
        if self.cache.max_entries == 0 {
            return invalid("cache.max_entries", "must be at least 1");
        }
        if self.cache.max_bytes == 0 {
            return invalid("cache.max_bytes", "must be at least 1");
        }
        if self.generation.timeout_secs == 0 {
            return invalid("generation.timeout_secs", "must be at least 1");
        }
        if self.generation.max_variants == 0 {
            return invalid("generation.max_variants", "must be at least 1");
        }
        if self.generation.default_variants == 0
            || self.generation.default_variants > self.generation.max_variants
        {
            return invalid(
                "generation.default_variants",
                "must be between 1 and generation.max_variants",
            );
        }
        if self.generation.max_prompt_chars == 0 {
            return invalid("generation.max_prompt_chars", "must be at least 1");
        }
        Ok(())
    }
}
