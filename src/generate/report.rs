//! Aggregated result of a whole generation run
//!
//! The batch endpoint answers with one JSON document instead of a stream.
//! It is folded from the same events a stream client would have seen.

use serde::Serialize;

use super::events::{ErrorKind, GenerationSummary, StreamEvent};

/// One failure reported during the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportedError {
    pub error: String,
    pub kind: ErrorKind,
}

/// Non-streaming generation result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationReport {
    /// True when the run finished with no errors
    pub success: bool,
    /// All text deltas, concatenated in order
    pub text: String,
    pub cache_keys: Vec<String>,
    pub image_urls: Vec<String>,
    pub errors: Vec<ReportedError>,
    pub summary: GenerationSummary,
}

impl GenerationReport {
    /// Fold a run's events into a report
    pub fn from_events<I>(events: I) -> Self
    where
        I: IntoIterator<Item = StreamEvent>,
    {
        let mut report = GenerationReport::default();
        let mut completed = false;

        for event in events {
            match event {
                StreamEvent::Connected => {}
                StreamEvent::Text { content } => report.text.push_str(&content),
                StreamEvent::Image { key, url } => {
                    report.cache_keys.push(key);
                    report.image_urls.push(url);
                }
                StreamEvent::Error { error, kind } => {
                    report.errors.push(ReportedError { error, kind })
                }
                StreamEvent::Complete => completed = true,
                StreamEvent::Final { summary } => report.summary = summary,
            }
        }

        report.success = completed && report.errors.is_empty();
        report
    }
}
