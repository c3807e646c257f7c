//! Global configuration parsing and validation.
//!
//! The agent registry, client identity, and every bounded wait used by the
//! session engine are read from a single TOML file at startup and never
//! mutated afterwards.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::{AppError, Result};

/// One configured agent server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentEndpoint {
    /// Registry key used by callers (e.g. `router`, `office`).
    pub name: String,
    /// Base address of the agent's SSE server, e.g. `http://127.0.0.1:8090`.
    pub base_url: String,
    /// Working directory handed to the agent as the `cwd` tool argument.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Tool invoked with `tools/call` for prompts.
    #[serde(default = "default_tool_name")]
    pub tool_name: String,
    /// Per-agent override for the whole-request deadline.
    #[serde(default)]
    pub request_seconds: Option<u64>,
}

impl AgentEndpoint {
    /// Parsed base address.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `base_url` is not an absolute URL.
    pub fn base(&self) -> Result<Url> {
        Url::parse(&self.base_url).map_err(|err| {
            AppError::Config(format!(
                "agent {} has invalid base_url {:?}: {err}",
                self.name, self.base_url
            ))
        })
    }

    /// URL of the push-event stream: `{base_url}/sse`.
    #[must_use]
    pub fn sse_url(&self) -> String {
        format!("{}/sse", self.base_url)
    }
}

fn default_tool_name() -> String {
    "codex".into()
}

/// Identity announced in the `initialize` request.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// `clientInfo.name`.
    #[serde(default = "default_client_name")]
    pub name: String,
    /// `clientInfo.version`.
    #[serde(default = "default_client_version")]
    pub version: String,
    /// `protocolVersion` sent during initialization.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            version: default_client_version(),
            protocol_version: default_protocol_version(),
        }
    }
}

fn default_client_name() -> String {
    "agent-bridge".into()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

fn default_protocol_version() -> String {
    "0.1.0".into()
}

/// Bounded waits for the session engine.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// TCP connect timeout for the shared HTTP client.
    #[serde(default = "default_connect_seconds")]
    pub connect_seconds: u64,
    /// Maximum wait for the `endpoint` event.
    #[serde(default = "default_handshake_seconds")]
    pub handshake_seconds: u64,
    /// Maximum wait for `session_configured` before sending a prompt.
    #[serde(default = "default_ready_wait_millis")]
    pub ready_wait_millis: u64,
    /// Whole-request deadline for `tools/call`.
    #[serde(default = "default_request_seconds")]
    pub request_seconds: u64,
    /// Longest silence tolerated on the push-event connection.
    #[serde(default = "default_idle_seconds")]
    pub idle_seconds: u64,
    /// Deadline for one health probe.
    #[serde(default = "default_health_seconds")]
    pub health_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_seconds: default_connect_seconds(),
            handshake_seconds: default_handshake_seconds(),
            ready_wait_millis: default_ready_wait_millis(),
            request_seconds: default_request_seconds(),
            idle_seconds: default_idle_seconds(),
            health_seconds: default_health_seconds(),
        }
    }
}

impl TimeoutConfig {
    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_seconds)
    }

    /// Handshake timeout as a [`Duration`].
    #[must_use]
    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_seconds)
    }

    /// Readiness wait as a [`Duration`].
    #[must_use]
    pub fn ready_wait(&self) -> Duration {
        Duration::from_millis(self.ready_wait_millis)
    }

    /// Request deadline for `agent`, honouring its override.
    #[must_use]
    pub fn request_for(&self, agent: &AgentEndpoint) -> Duration {
        Duration::from_secs(agent.request_seconds.unwrap_or(self.request_seconds))
    }

    /// Largest request deadline across `agents`, at least the global one.
    #[must_use]
    pub fn longest_request(&self, agents: &[AgentEndpoint]) -> Duration {
        agents
            .iter()
            .map(|agent| self.request_for(agent))
            .fold(Duration::from_secs(self.request_seconds), Duration::max)
    }

    /// Idle timeout as a [`Duration`].
    #[must_use]
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_seconds)
    }

    /// Health probe deadline as a [`Duration`].
    #[must_use]
    pub fn health(&self) -> Duration {
        Duration::from_secs(self.health_seconds)
    }
}

fn default_connect_seconds() -> u64 {
    5
}

fn default_handshake_seconds() -> u64 {
    10
}

fn default_ready_wait_millis() -> u64 {
    2000
}

fn default_request_seconds() -> u64 {
    180
}

fn default_idle_seconds() -> u64 {
    120
}

fn default_health_seconds() -> u64 {
    5
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Client identity for the handshake.
    #[serde(default)]
    pub client: ClientConfig,
    /// Bounded waits.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Agent registry, one entry per configured agent.
    pub agents: Vec<AgentEndpoint>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize base addresses.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if self.agents.is_empty() {
            return Err(AppError::Config("agents must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for agent in &mut self.agents {
            if agent.name.trim().is_empty() {
                return Err(AppError::Config("agent name must not be empty".into()));
            }
            if !seen.insert(agent.name.clone()) {
                return Err(AppError::Config(format!(
                    "duplicate agent name: {}",
                    agent.name
                )));
            }
            if agent.tool_name.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "agent {} has an empty tool_name",
                    agent.name
                )));
            }
            if agent.request_seconds == Some(0) {
                return Err(AppError::Config(format!(
                    "agent {} request_seconds must be greater than zero",
                    agent.name
                )));
            }

            // `{base_url}/sse` must not produce a double slash.
            let trimmed = agent.base_url.trim_end_matches('/').to_owned();
            agent.base_url = trimmed;
            let base = agent.base()?;
            if !matches!(base.scheme(), "http" | "https") {
                return Err(AppError::Config(format!(
                    "agent {} base_url must use http or https",
                    agent.name
                )));
            }
        }

        let t = &self.timeouts;
        if t.connect_seconds == 0
            || t.handshake_seconds == 0
            || t.request_seconds == 0
            || t.idle_seconds == 0
            || t.health_seconds == 0
        {
            return Err(AppError::Config(
                "timeouts must be greater than zero (ready_wait_millis excepted)".into(),
            ));
        }

        Ok(())
    }
}
