//! EventStream - typed reader for `text/event-stream` generation responses

#![allow(dead_code)]

use std::pin::Pin;
use std::time::Duration;

use anyhow::{bail, Result};
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use illumd::generate::StreamEvent;

/// Default time to wait for a single event
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Event name the decoder reports when a frame has no `event:` line
const DEFAULT_EVENT_NAME: &str = "message";

type Frames = Pin<Box<dyn Stream<Item = Result<Event, EventStreamError<reqwest::Error>>> + Send>>;

/// A generation response being read event by event
pub struct EventStream {
    frames: Option<Frames>,
}

impl EventStream {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            frames: Some(response.bytes_stream().eventsource().boxed()),
        }
    }

    /// Next event, or `None` once the server has closed the stream
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>> {
        self.next_event_within(EVENT_TIMEOUT).await
    }

    /// Next event, failing if none arrives within `timeout`
    pub async fn next_event_within(&mut self, timeout: Duration) -> Result<Option<StreamEvent>> {
        loop {
            let next = match self.frames.as_mut() {
                Some(frames) => tokio::time::timeout(timeout, frames.next()).await,
                None => return Ok(None),
            };

            match next {
                Err(_) => bail!("No event within {:?}", timeout),
                Ok(None) => {
                    self.frames = None;
                    return Ok(None);
                }
                Ok(Some(Err(e))) => bail!("Event stream error: {}", e),
                // Keep-alive comments carry no data
                Ok(Some(Ok(frame))) if frame.data.is_empty() => continue,
                Ok(Some(Ok(frame))) => return Ok(Some(Self::decode(frame)?)),
            }
        }
    }

    /// Read until the server closes the stream
    pub async fn collect(mut self) -> Result<Vec<StreamEvent>> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await? {
            events.push(event);
        }
        Ok(events)
    }

    /// Read until an event with the given name arrives
    pub async fn expect(&mut self, name: &str) -> Result<StreamEvent> {
        while let Some(event) = self.next_event().await? {
            if event.name() == name {
                return Ok(event);
            }
        }
        bail!("Stream ended before a {:?} event", name)
    }

    /// Drop the connection without reading further
    pub fn disconnect(mut self) {
        self.frames.take();
    }

    /// The `event:` line must agree with the payload's own `type`
    fn decode(frame: Event) -> Result<StreamEvent> {
        let event: StreamEvent = serde_json::from_str(&frame.data)?;
        if frame.event != DEFAULT_EVENT_NAME && frame.event != event.name() {
            bail!(
                "event line {:?} disagrees with payload {:?}",
                frame.event,
                event.name()
            );
        }
        Ok(event)
    }
}

/// Names of `events`, in order
pub fn names(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::name).collect()
}
