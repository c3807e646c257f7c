//! JSON-RPC 2.0 envelopes exchanged with agent servers.
//!
//! Outbound requests and notifications are typed structs; inbound messages
//! are kept as [`serde_json::Value`] and classified by [`classify`] because
//! servers mix responses, broadcasts, and native event envelopes on the same
//! push connection.

use serde::Serialize;
use serde_json::Value;

/// Protocol version tag carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// A request that expects a correlated response.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RpcRequest {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: &'static str,
    /// Method name, e.g. `tools/call`.
    pub method: String,
    /// Method parameters; always an object.
    pub params: Value,
    /// Correlation identifier assigned by the correlator.
    pub id: u64,
}

impl RpcRequest {
    /// Build a request envelope.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
            id,
        }
    }
}

/// A fire-and-forget message without an `id`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RpcNotification {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: &'static str,
    /// Method name, e.g. `notifications/initialized`.
    pub method: String,
    /// Method parameters; always an object.
    pub params: Value,
}

impl RpcNotification {
    /// Build a notification envelope.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

/// Inbound message shape as seen by a request's aggregator.
#[derive(Debug, PartialEq)]
pub enum Inbound<'a> {
    /// No `id` field: a broadcast to inspect for stream events.
    Broadcast(&'a Value),
    /// Response carrying `result`. `id` is `None` when it is not an integer.
    Success {
        /// Correlation id, if numeric.
        id: Option<u64>,
        /// The `result` payload.
        result: &'a Value,
    },
    /// Response carrying `error`.
    Failure {
        /// Correlation id, if numeric.
        id: Option<u64>,
        /// Human-readable cause.
        message: String,
    },
    /// Carries an `id` but neither `result` nor `error` (a server request).
    Other {
        /// Correlation id, if numeric.
        id: Option<u64>,
    },
}

/// Classify an inbound JSON-RPC message.
#[must_use]
pub fn classify(msg: &Value) -> Inbound<'_> {
    let Some(raw_id) = msg.get("id").filter(|id| !id.is_null()) else {
        return Inbound::Broadcast(msg);
    };
    let id = raw_id.as_u64();

    if let Some(error) = msg.get("error") {
        return Inbound::Failure {
            id,
            message: error_message(error),
        };
    }
    match msg.get("result") {
        Some(result) => Inbound::Success { id, result },
        None => Inbound::Other { id },
    }
}

/// Extract `error.message`, falling back to the serialized error value.
#[must_use]
pub fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .map_or_else(|| error.to_string(), str::to_owned)
}
