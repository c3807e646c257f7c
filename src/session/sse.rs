//! Push-event connection to an agent server.
//!
//! Wraps `GET {base}/sse` in a stream of [`SseFrame`]s using
//! [`eventsource_stream`] for the `text/event-stream` framing. Every read is
//! bounded by an idle timeout, which is the backstop against a server that
//! stops talking without closing the socket.

use std::pin::Pin;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Event name announcing the message-submission endpoint.
pub const ENDPOINT_EVENT: &str = "endpoint";

/// One named server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event name; `message` when the server sent none.
    pub event: String,
    /// Raw `data:` payload.
    pub data: String,
}

impl SseFrame {
    /// Build a frame.
    #[must_use]
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Parse the payload as one JSON-RPC message.
    ///
    /// Returns `None` (after logging) for `endpoint` frames, blank payloads,
    /// and malformed JSON. A bad frame never aborts the call.
    #[must_use]
    pub fn json(&self) -> Option<Value> {
        if self.event == ENDPOINT_EVENT {
            debug!(data = %self.data, "sse: ignoring repeated endpoint event");
            return None;
        }
        if self.data.trim().is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(&self.data) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(event = %self.event, error = %err, raw = %self.data, "sse: invalid JSON, skipping");
                None
            }
        }
    }
}

type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame>> + Send>>;

/// An open push-event connection.
///
/// Dropping it closes the underlying HTTP response.
pub struct EventConnection {
    frames: FrameStream,
    idle: Duration,
    closed: bool,
}

impl std::fmt::Debug for EventConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventConnection")
            .field("idle", &self.idle)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl EventConnection {
    /// Open `url` as an event stream.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the request fails or the server
    /// answers with a non-success status.
    pub async fn open(http: &reqwest::Client, url: &str, idle: Duration) -> Result<Self> {
        let response = http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|err| AppError::Transport(format!("failed to connect to {url}: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Transport(format!(
                "{url} answered {status} to the event-stream request"
            )));
        }

        let frames = response.bytes_stream().eventsource().map(|item| {
            item.map(|event| SseFrame::new(event.event, event.data))
                .map_err(|err| AppError::Transport(format!("event stream error: {err}")))
        });

        debug!(url, "sse: connection open");
        Ok(Self::from_stream(frames, idle))
    }

    /// Wrap an existing frame stream.
    pub fn from_stream<S>(frames: S, idle: Duration) -> Self
    where
        S: Stream<Item = Result<SseFrame>> + Send + 'static,
    {
        Self {
            frames: Box::pin(frames),
            idle,
            closed: false,
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` once the stream has ended; the inner stream is not
    /// polled again after that.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` on a stream error or when no frame
    /// arrives within the idle timeout.
    pub async fn next_frame(&mut self) -> Result<Option<SseFrame>> {
        if self.closed {
            return Ok(None);
        }
        match tokio::time::timeout(self.idle, self.frames.next()).await {
            Err(_) => Err(AppError::Transport(format!(
                "no event received within {:?}",
                self.idle
            ))),
            Ok(None) => {
                self.closed = true;
                Ok(None)
            }
            Ok(Some(Ok(frame))) => Ok(Some(frame)),
            Ok(Some(Err(err))) => {
                self.closed = true;
                Err(err)
            }
        }
    }
}
