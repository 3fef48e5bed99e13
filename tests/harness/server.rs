//! Test servers
//!
//! `TestServer` runs the library server in-process so tests can script the
//! provider and inspect the cache directly. `BinaryServer` spawns the real
//! binary to cover CLI parsing and startup. Both use a fresh temporary cache
//! directory and a random port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use illumd::cache::ImageCache;
use illumd::provider::ScriptedProvider;
use illumd::{Config, Server};
use reqwest::Client;
use serde_json::json;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use super::client::EventStream;

/// Find a free local port
fn free_addr() -> Result<SocketAddr> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

/// Poll the health endpoint until it answers
async fn wait_ready(client: &Client, addr: SocketAddr) -> bool {
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if client
            .get(format!("http://{}/api/health", addr))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
    }
    false
}

/// In-process server with a scripted provider
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    server: Arc<Server>,
    provider: ScriptedProvider,
    _handle: JoinHandle<()>,
    /// Cache root (cleaned up on drop)
    _temp_dir: TempDir,
}

impl TestServer {
    /// Start with the placeholder script
    pub async fn start() -> Result<Self> {
        Self::start_with(ScriptedProvider::placeholder(), |_| {}).await
    }

    /// Start with the given provider
    pub async fn start_with_provider(provider: ScriptedProvider) -> Result<Self> {
        Self::start_with(provider, |_| {}).await
    }

    /// Start with the given provider and configuration tweaks
    pub async fn start_with(
        provider: ScriptedProvider,
        configure: impl FnOnce(&mut Config),
    ) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let addr = free_addr()?;

        let mut config = Config::default();
        config.server.bind_addr = addr;
        config.cache.dir = temp_dir.path().join("cache");
        configure(&mut config);

        let server =
            Arc::new(Server::with_provider(config, Arc::new(provider.clone())).await?);
        let server_clone = server.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = server_clone.run().await {
                eprintln!("Server error: {}", e);
            }
        });

        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        if !wait_ready(&client, addr).await {
            panic!("Server failed to start within 5 seconds");
        }

        Ok(Self {
            addr,
            client,
            server,
            provider,
            _handle: handle,
            _temp_dir: temp_dir,
        })
    }

    /// Get the base URL for the server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await?)
    }

    /// Make a HEAD request
    pub async fn head(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .head(format!("{}{}", self.base_url(), path))
            .send()
            .await?)
    }

    /// Make a POST request with JSON body
    pub async fn post<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        Ok(self
            .client
            .post(format!("{}{}", self.base_url(), path))
            .json(body)
            .send()
            .await?)
    }

    /// Open a generation stream with default options
    pub async fn generate(&self, prompt: &str) -> Result<EventStream> {
        self.generate_with(json!({ "paperText": prompt })).await
    }

    /// Open a generation stream with an explicit request body
    pub async fn generate_with(&self, body: serde_json::Value) -> Result<EventStream> {
        let resp = self.post("/api/generate/stream", &body).await?;
        if !resp.status().is_success() {
            anyhow::bail!("Stream request failed with {}", resp.status());
        }
        Ok(EventStream::new(resp))
    }

    /// The provider shared with the server
    pub fn provider(&self) -> &ScriptedProvider {
        &self.provider
    }

    /// Direct access to the cache for assertions
    pub fn cache(&self) -> Arc<ImageCache> {
        self.server.cache()
    }

    /// Files currently in the images directory
    pub fn image_files(&self) -> Vec<PathBuf> {
        list_files(self.server.cache().images_dir())
    }

    /// Shutdown the server gracefully
    pub fn shutdown(&self) {
        self.server.shutdown();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

fn list_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect()
        })
        .unwrap_or_default()
}

/// The `illumd` binary running with the scripted provider
pub struct BinaryServer {
    pub addr: SocketAddr,
    pub client: Client,
    pub cache_dir: PathBuf,
    child: Child,
    _temp_dir: TempDir,
}

impl BinaryServer {
    /// Spawn the binary and wait for it to answer
    pub async fn start() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let cache_dir = temp_dir.path().join("cache");
        let addr = free_addr()?;

        let binary_path = env!("CARGO_BIN_EXE_illumd");
        let child = Command::new(binary_path)
            .arg("--bind")
            .arg(addr.to_string())
            .arg("--cache-dir")
            .arg(&cache_dir)
            .arg("--provider")
            .arg("scripted")
            .current_dir(temp_dir.path())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn illumd at {}: {}", binary_path, e))?;

        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        let mut server = Self {
            addr,
            client,
            cache_dir,
            child,
            _temp_dir: temp_dir,
        };

        if !wait_ready(&server.client, addr).await {
            let _ = server.child.kill();
            panic!("illumd binary failed to start within 5 seconds");
        }

        Ok(server)
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(format!("http://{}{}", self.addr, path))
            .send()
            .await?)
    }

    /// Open a generation stream
    pub async fn generate(&self, prompt: &str) -> Result<EventStream> {
        let resp = self
            .client
            .post(format!("http://{}/api/generate/stream", self.addr))
            .json(&json!({ "paperText": prompt, "variants": 1 }))
            .send()
            .await?;
        Ok(EventStream::new(resp))
    }

    /// Files currently in the images directory
    pub fn image_files(&self) -> Vec<PathBuf> {
        list_files(&self.cache_dir.join("images"))
    }
}

impl Drop for BinaryServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
