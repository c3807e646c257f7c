//! Per-request aggregation of streamed agent output.
//!
//! An [`Aggregator`] owns the request id and sees every message that arrives
//! on the session's push connection after the request was sent. It applies
//! only broadcasts (no `id`) and responses whose `id` equals its own;
//! everything else is ignored without error.
//!
//! Agents finish a request in one of several observed ways, all supported:
//!
//! - deltas, then `task_complete` without text → text is the joined deltas;
//! - `task_complete` carrying `last_agent_message` and no deltas;
//! - a JSON-RPC response for the request id (adopted immediately, since an
//!   intermediary may have dropped `task_complete`);
//! - the connection closes after some deltas → the partial text is returned
//!   rather than discarded.

use std::collections::VecDeque;

use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::events::{decode_wire, result_text, CallOutcome, StreamChunk, StreamEvent};
use crate::rpc::{classify, Inbound};
use crate::{AppError, Result};

/// Whether the aggregator has produced its terminal output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Keep feeding messages.
    Pending,
    /// A terminal item was queued; stop reading.
    Finished,
}

/// Output queue shared with the stream driver.
pub type Outbox = VecDeque<Result<StreamChunk>>;

/// Accumulates one request's deltas and detects its end.
#[derive(Debug)]
pub struct Aggregator {
    request_id: u64,
    live: bool,
    reasoning: Vec<String>,
    message: Vec<String>,
    tool_error_seen: bool,
    finished: bool,
}

impl Aggregator {
    /// Start aggregating for `request_id`. With `live`, deltas are queued as
    /// chunks the moment they arrive.
    #[must_use]
    pub fn new(request_id: u64, live: bool) -> Self {
        Self {
            request_id,
            live,
            reasoning: Vec::new(),
            message: Vec::new(),
            tool_error_seen: false,
            finished: false,
        }
    }

    /// The correlation id this aggregator claims.
    #[must_use]
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Whether a tool call inside the agent reported an error.
    #[must_use]
    pub fn tool_error_seen(&self) -> bool {
        self.tool_error_seen
    }

    /// Apply one inbound message, queueing any output into `out`.
    pub fn apply(&mut self, msg: &Value, out: &mut Outbox) -> Progress {
        if self.finished {
            return Progress::Finished;
        }

        match classify(msg) {
            Inbound::Broadcast(broadcast) => match decode_wire(broadcast) {
                Some(event) => self.apply_event(event, out),
                None => {
                    trace!(request_id = self.request_id, "aggregator: ignoring undecodable broadcast");
                    Progress::Pending
                }
            },
            Inbound::Success { id, result } if id == Some(self.request_id) => {
                let text = self.joined_message().or_else(|| result_text(result));
                let outcome = self.outcome(text, Some(result.clone()), false);
                self.finish(out, Ok(StreamChunk::Result(outcome)))
            }
            Inbound::Failure { id, message } if id == Some(self.request_id) => {
                warn!(request_id = self.request_id, error = %message, "aggregator: request failed");
                self.finish(out, Err(AppError::Remote(message)))
            }
            Inbound::Success { id, .. } | Inbound::Failure { id, .. } | Inbound::Other { id } => {
                trace!(request_id = self.request_id, other = ?id, "aggregator: ignoring foreign id");
                Progress::Pending
            }
        }
    }

    /// Apply one decoded stream event.
    pub fn apply_event(&mut self, event: StreamEvent, out: &mut Outbox) -> Progress {
        if self.finished {
            return Progress::Finished;
        }

        match event {
            StreamEvent::ConnectionEstablished => {
                trace!(request_id = self.request_id, "aggregator: late readiness marker");
            }
            StreamEvent::MessageDelta { delta } => {
                if self.live {
                    out.push_back(Ok(StreamChunk::Chunk(delta.clone())));
                }
                self.message.push(delta);
            }
            StreamEvent::ReasoningDelta { delta, .. } => {
                if self.live {
                    out.push_back(Ok(StreamChunk::Reasoning(delta.clone())));
                }
                self.reasoning.push(delta);
            }
            StreamEvent::ToolCallBegin { .. } => {
                debug!(request_id = self.request_id, "aggregator: tool call started");
            }
            StreamEvent::ToolCallEnd { error, .. } => {
                if let Some(error) = error {
                    // The agent retries internally; this does not end the request.
                    warn!(request_id = self.request_id, %error, "aggregator: tool call reported an error");
                    self.tool_error_seen = true;
                }
            }
            StreamEvent::TaskComplete {
                last_agent_message, ..
            } => {
                let text = self.joined_message().or(last_agent_message);
                let outcome = self.outcome(text, None, false);
                return self.finish(out, Ok(StreamChunk::Result(outcome)));
            }
            StreamEvent::Opaque { event_type, .. } => {
                debug!(request_id = self.request_id, event_type = %event_type, "aggregator: informational event");
            }
        }
        Progress::Pending
    }

    /// The connection ended (closed, failed, or timed out) before a terminal
    /// event. Returns collected message text as a partial result when there
    /// is any, otherwise an error built from `cause`.
    pub fn close(&mut self, cause: AppError, out: &mut Outbox) -> Progress {
        if self.finished {
            return Progress::Finished;
        }
        match self.joined_message() {
            Some(text) => {
                warn!(
                    request_id = self.request_id,
                    %cause,
                    "aggregator: stream ended without a terminal event, returning partial result"
                );
                let outcome = self.outcome(Some(text), None, true);
                self.finish(out, Ok(StreamChunk::Result(outcome)))
            }
            None => self.finish(out, Err(cause)),
        }
    }

    fn finish(&mut self, out: &mut Outbox, item: Result<StreamChunk>) -> Progress {
        self.finished = true;
        out.push_back(item);
        Progress::Finished
    }

    fn joined_message(&self) -> Option<String> {
        if self.message.is_empty() {
            None
        } else {
            Some(self.message.concat())
        }
    }

    fn outcome(&mut self, text: Option<String>, payload: Option<Value>, partial: bool) -> CallOutcome {
        CallOutcome {
            text,
            message_fragments: std::mem::take(&mut self.message),
            reasoning_fragments: std::mem::take(&mut self.reasoning),
            payload,
            tool_error_seen: self.tool_error_seen,
            partial,
        }
    }
}
