//! illumd - streaming illustration service
//!
//! Turns a text prompt into a live event stream of text fragments and image
//! references, storing generated images in a content-addressed disk cache.

pub mod api;
pub mod cache;
pub mod config;
pub mod generate;
pub mod provider;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use cache::ImageCache;
use generate::Orchestrator;
use provider::ImageProvider;

pub use config::Config;

/// Upper bound on how often expired entries are swept
const MAX_EXPIRY_INTERVAL: Duration = Duration::from_secs(300);

/// The illumd server instance
pub struct Server {
    config: Config,
    cache: Arc<ImageCache>,
    orchestrator: Orchestrator,
    started_at: Instant,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Create a server using the provider selected by configuration
    pub async fn new(config: Config) -> Result<Self> {
        let provider = provider::from_config(&config.provider)?;
        Self::with_provider(config, provider).await
    }

    /// Create a server around an explicit provider
    pub async fn with_provider(config: Config, provider: Arc<dyn ImageProvider>) -> Result<Self> {
        let cache = ImageCache::open(config.cache.dir.clone(), config.cache.retention()).await?;
        let cache = Arc::new(cache);
        let orchestrator = Orchestrator::new(provider, cache.clone(), config.generation.timeout());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            "Using provider {} with cache at {}",
            orchestrator.provider_name(),
            cache.root().display()
        );

        Ok(Self {
            config,
            cache,
            orchestrator,
            started_at: Instant::now(),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Get the image cache handle
    pub fn cache(&self) -> Arc<ImageCache> {
        self.cache.clone()
    }

    /// Build the router
    fn router(&self) -> Router {
        api::router(api::AppState {
            cache: self.cache.clone(),
            orchestrator: self.orchestrator.clone(),
            generation: self.config.generation.clone(),
            stream_buffer: self.config.server.stream_buffer,
            started_at: self.started_at,
        })
    }

    /// Periodically drop entries past their TTL until shutdown
    fn spawn_expiry(&self, ttl: Duration) {
        let cache = self.cache.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let period = ttl.min(MAX_EXPIRY_INTERVAL).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = cache.expire().await;
                        if !report.deleted_files.is_empty() {
                            info!(
                                "Expired {} cached images ({} bytes)",
                                report.deleted_files.len(),
                                report.freed_space
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
    }

    /// Run the server until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.server.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("illumd listening on {}", local_addr);

        if let Some(ttl) = self.cache.policy().ttl {
            self.spawn_expiry(ttl);
        }

        let router = self.router();
        let mut shutdown_rx = self.shutdown_rx.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await?;

        info!("illumd shutdown complete");
        Ok(())
    }

    /// Signal the server to shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.server.bind_addr
    }
}
