//! Streaming generation module
//!
//! Provides:
//! - The stream event protocol
//! - Request validation
//! - The orchestrator that turns provider output into events
//! - Aggregated reports for non-streaming callers

mod events;
mod orchestrator;
mod report;

pub use events::{image_url, ErrorKind, GenerationSummary, StreamEvent, IMAGE_ROUTE_PREFIX};
pub use orchestrator::{GenerationRequest, Orchestrator, Outcome, RequestError};
pub use report::{GenerationReport, ReportedError};
