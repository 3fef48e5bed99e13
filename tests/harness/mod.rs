//! Integration Test Harness
//!
//! - `TestServer` - Runs a server in-process on a random port with a
//!   scripted provider and a temporary cache directory
//! - `BinaryServer` - Spawns the real `illumd` binary, exercising CLI parsing
//! - `EventStream` - Reads a generation response as typed stream events
//!
//! # Example
//!
//! ```rust,ignore
//! use harness::TestServer;
//!
//! #[tokio::test]
//! async fn test_generate() {
//!     let server = TestServer::start().await.unwrap();
//!     let events = server.generate("A simple red circle").await.unwrap().collect().await.unwrap();
//!     assert!(events.iter().any(|e| e.name() == "image"));
//! }
//! ```

mod client;
mod server;

pub use client::names;
pub use server::{BinaryServer, TestServer};
