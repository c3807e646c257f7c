//! Agent session engine.
//!
//! Every call opens its own push-event connection, performs the handshake,
//! sends one request, and aggregates the streamed answer. Sessions are never
//! reused; the only state shared between calls is the request id counter.

pub mod aggregator;
pub mod client;
pub mod correlator;
pub mod handshake;
pub mod sse;
pub mod stream;

use std::time::Duration;

use crate::config::{ClientConfig, GlobalConfig};

pub use aggregator::{Aggregator, Progress};
pub use client::{compose_prompt, AgentClient, AgentRegistry, HealthStatus, ToolInfo};
pub use correlator::{Outbound, RequestIds};
pub use handshake::{Session, SessionHandle};
pub use stream::{ChunkStream, Operation};

/// Handshake parameters shared by every session of one client.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Identity announced in `initialize`.
    pub client: ClientConfig,
    /// Bound on endpoint discovery plus initialization.
    pub handshake: Duration,
    /// Bound on the `session_configured` wait before a prompt is sent.
    pub ready_wait: Duration,
    /// Longest silence tolerated on the push connection.
    pub idle: Duration,
}

impl SessionSettings {
    /// Extract session settings from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            client: config.client.clone(),
            handshake: config.timeouts.handshake(),
            ready_wait: config.timeouts.ready_wait(),
            idle: config.timeouts.idle(),
        }
    }
}
