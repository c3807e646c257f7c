//! Event codec shared by the session client and the gateway.
//!
//! Three shapes meet here:
//!
//! 1. the agent's native envelope,
//!    `{"method":"codex/event","params":{"msg":{"type":…,…}}}`;
//! 2. the wire notifications the gateway emits and the client consumes;
//! 3. the typed [`StreamChunk`]s handed to callers.
//!
//! Decoding is permissive: the agent's event vocabulary is open-ended, so
//! anything with a `type` that is not recognized becomes
//! [`StreamEvent::Opaque`] instead of an error. Envelopes without a usable
//! `type` decode to `None`.
//!
//! | native `type`                                  | [`StreamEvent`]          |
//! |------------------------------------------------|--------------------------|
//! | `session_configured`                           | `ConnectionEstablished`  |
//! | `agent_message_delta`                          | `MessageDelta`           |
//! | `agent_reasoning_delta`                        | `ReasoningDelta`         |
//! | `agent_reasoning_raw_content_delta`            | `ReasoningDelta` (raw)   |
//! | `mcp_tool_call_begin` / `mcp_tool_call_end`    | `ToolCallBegin` / `End`  |
//! | `task_complete`                                | `TaskComplete`           |
//! | *(anything else)*                              | `Opaque`                 |

use serde::Serialize;
use serde_json::{json, Value};

use crate::rpc::JSONRPC_VERSION;

/// Method name of the agent's native event envelope.
pub const NATIVE_EVENT_METHOD: &str = "codex/event";

/// Method used for events the codec does not recognize.
pub const INFO_METHOD: &str = "notifications/message";

const SESSION_CONFIGURED: &str = "session_configured";
const AGENT_MESSAGE_DELTA: &str = "agent_message_delta";
const AGENT_REASONING_DELTA: &str = "agent_reasoning_delta";
const AGENT_REASONING_RAW_DELTA: &str = "agent_reasoning_raw_content_delta";
const TOOL_CALL_BEGIN: &str = "mcp_tool_call_begin";
const TOOL_CALL_END: &str = "mcp_tool_call_end";
const TASK_COMPLETE: &str = "task_complete";

/// Typed view of one agent event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The agent finished configuring its session; operational requests are
    /// safe to send.
    ConnectionEstablished,
    /// Incremental answer text.
    MessageDelta {
        /// Text fragment.
        delta: String,
    },
    /// Incremental reasoning text.
    ReasoningDelta {
        /// `true` for `agent_reasoning_raw_content_delta`.
        raw: bool,
        /// Text fragment.
        delta: String,
    },
    /// The agent started a tool call.
    ToolCallBegin {
        /// The native `msg` object.
        payload: Value,
    },
    /// The agent finished a tool call.
    ToolCallEnd {
        /// The native `msg` object.
        payload: Value,
        /// Error embedded in the tool result, if any.
        error: Option<String>,
    },
    /// Terminal event: the answer is complete.
    TaskComplete {
        /// Full answer text, when the agent includes it.
        last_agent_message: Option<String>,
        /// The envelope exactly as decoded, re-emitted unchanged.
        raw: Value,
    },
    /// Any event type this codec does not model.
    Opaque {
        /// Native `type` string.
        event_type: String,
        /// The native `msg` object.
        payload: Value,
    },
}

impl StreamEvent {
    /// Native `type` string this event was decoded from.
    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            Self::ConnectionEstablished => SESSION_CONFIGURED,
            Self::MessageDelta { .. } => AGENT_MESSAGE_DELTA,
            Self::ReasoningDelta { raw: false, .. } => AGENT_REASONING_DELTA,
            Self::ReasoningDelta { raw: true, .. } => AGENT_REASONING_RAW_DELTA,
            Self::ToolCallBegin { .. } => TOOL_CALL_BEGIN,
            Self::ToolCallEnd { .. } => TOOL_CALL_END,
            Self::TaskComplete { .. } => TASK_COMPLETE,
            Self::Opaque { event_type, .. } => event_type,
        }
    }
}

/// Decode a native event.
///
/// Accepts either the full `codex/event` envelope or a bare `msg` object
/// carrying a `type` field. Returns `None` for anything else.
#[must_use]
pub fn decode_native(raw: &Value) -> Option<StreamEvent> {
    let msg = if raw.get("method").and_then(Value::as_str) == Some(NATIVE_EVENT_METHOD) {
        raw.get("params")?.get("msg")?
    } else {
        raw
    };
    decode_msg(msg, raw)
}

/// Decode a message received on the push connection.
///
/// Understands native envelopes passed through by the gateway as well as the
/// `notifications/*` shapes produced by [`encode_notification`].
#[must_use]
pub fn decode_wire(message: &Value) -> Option<StreamEvent> {
    let method = message.get("method").and_then(Value::as_str)?;
    let params = message.get("params");

    if method == NATIVE_EVENT_METHOD {
        decode_native(message)
    } else if method == INFO_METHOD {
        decode_msg(params?.get("data")?, message)
    } else if method.starts_with("notifications/") {
        decode_msg(params?, message)
    } else {
        None
    }
}

/// Encode an event as the wire notification the gateway emits.
///
/// Returns `None` for internal markers that are never forwarded.
#[must_use]
pub fn encode_notification(event: &StreamEvent) -> Option<Value> {
    match event {
        StreamEvent::ConnectionEstablished => None,
        StreamEvent::MessageDelta { delta } | StreamEvent::ReasoningDelta { delta, .. } => {
            let event_type = event.event_type();
            Some(notification(
                &format!("notifications/{event_type}"),
                json!({ "type": event_type, "delta": delta }),
            ))
        }
        StreamEvent::ToolCallBegin { payload } | StreamEvent::ToolCallEnd { payload, .. } => {
            Some(notification(
                &format!("notifications/{}", event.event_type()),
                payload.clone(),
            ))
        }
        StreamEvent::TaskComplete { raw, .. } => Some(raw.clone()),
        StreamEvent::Opaque { payload, .. } => Some(notification(
            INFO_METHOD,
            json!({ "level": "info", "data": payload, "logger": "codex" }),
        )),
    }
}

fn notification(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "method": method, "params": params })
}

fn decode_msg(msg: &Value, raw: &Value) -> Option<StreamEvent> {
    let event_type = msg.get("type").and_then(Value::as_str)?;
    let delta = || {
        msg.get("delta")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned()
    };

    let event = match event_type {
        SESSION_CONFIGURED => StreamEvent::ConnectionEstablished,
        AGENT_MESSAGE_DELTA => StreamEvent::MessageDelta { delta: delta() },
        AGENT_REASONING_DELTA => StreamEvent::ReasoningDelta {
            raw: false,
            delta: delta(),
        },
        AGENT_REASONING_RAW_DELTA => StreamEvent::ReasoningDelta {
            raw: true,
            delta: delta(),
        },
        TOOL_CALL_BEGIN => StreamEvent::ToolCallBegin {
            payload: msg.clone(),
        },
        TOOL_CALL_END => StreamEvent::ToolCallEnd {
            payload: msg.clone(),
            error: tool_error(msg),
        },
        TASK_COMPLETE => StreamEvent::TaskComplete {
            last_agent_message: msg
                .get("last_agent_message")
                .and_then(Value::as_str)
                .map(str::to_owned),
            raw: raw.clone(),
        },
        other => StreamEvent::Opaque {
            event_type: other.to_owned(),
            payload: msg.clone(),
        },
    };
    Some(event)
}

/// Find an error embedded in an `mcp_tool_call_end` payload.
///
/// Agents report it either as a top-level `error`, as `result.Err`, or as an
/// MCP tool result flagged with `isError`.
fn tool_error(msg: &Value) -> Option<String> {
    fn describe(v: &Value) -> String {
        v.as_str().map_or_else(|| v.to_string(), str::to_owned)
    }

    if let Some(err) = msg.get("error").filter(|e| !e.is_null()) {
        return Some(describe(err));
    }
    let result = msg.get("result")?;
    if let Some(err) = result.get("Err") {
        return Some(describe(err));
    }
    let flagged = result
        .get("Ok")
        .unwrap_or(result)
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    flagged.then(|| "tool result flagged isError".to_owned())
}

// ── Caller-facing chunks ──────────────────────────────────────────────────────

/// Assembled answer for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallOutcome {
    /// Final answer text, if any could be assembled.
    pub text: Option<String>,
    /// Message deltas in arrival order.
    pub message_fragments: Vec<String>,
    /// Reasoning deltas in arrival order.
    pub reasoning_fragments: Vec<String>,
    /// The JSON-RPC `result` payload, when the response carried one.
    pub payload: Option<Value>,
    /// A tool call inside the agent reported an error.
    pub tool_error_seen: bool,
    /// The connection closed before a terminal event; content is partial.
    pub partial: bool,
}

/// One item of a request's output sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Live answer delta.
    Chunk(String),
    /// Live reasoning delta.
    Reasoning(String),
    /// Terminal success.
    Result(CallOutcome),
    /// Terminal failure with a human-readable cause.
    Error(String),
}

impl StreamChunk {
    /// Whether this chunk ends the sequence.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_) | Self::Error(_))
    }
}

/// Text of the first `content` item of an MCP tool result.
#[must_use]
pub fn result_text(payload: &Value) -> Option<String> {
    payload
        .get("content")?
        .as_array()?
        .iter()
        .find_map(|item| item.get("text").and_then(Value::as_str))
        .map(str::to_owned)
}
