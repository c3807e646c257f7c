//! Session client facade.
//!
//! [`AgentClient`] is built once from [`GlobalConfig`] and handed to every
//! call site. It owns the read-only agent registry, one shared HTTP client,
//! and the request id counter.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::correlator::{Outbound, RequestIds};
use super::stream::{self, ChunkStream, Operation, TypedChunkStream};
use super::SessionSettings;
use crate::config::{AgentEndpoint, GlobalConfig, TimeoutConfig};
use crate::events::CallOutcome;
use crate::{AppError, Result};

/// Method used for prompts.
pub const CALL_METHOD: &str = "tools/call";

/// Method used for tool discovery and health probes.
pub const LIST_METHOD: &str = "tools/list";

/// Immutable name → endpoint map.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentEndpoint>,
}

impl AgentRegistry {
    /// Build the registry from configured agents.
    #[must_use]
    pub fn from_agents(agents: impl IntoIterator<Item = AgentEndpoint>) -> Self {
        Self {
            agents: agents
                .into_iter()
                .map(|agent| (agent.name.clone(), agent))
                .collect(),
        }
    }

    /// Look up an agent by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownAgent` if `name` is not registered.
    pub fn get(&self, name: &str) -> Result<&AgentEndpoint> {
        self.agents
            .get(name)
            .ok_or_else(|| AppError::UnknownAgent(name.to_owned()))
    }

    /// Registered agents in name order.
    pub fn iter(&self) -> impl Iterator<Item = &AgentEndpoint> {
        self.agents.values()
    }

    /// Number of registered agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// One tool advertised by an agent.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolInfo {
    /// Tool identifier.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// JSON schema of the tool's arguments.
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

/// Outcome of one health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// The agent listed at least one tool.
    Healthy {
        /// Number of tools listed.
        tools: usize,
    },
    /// The agent answered with an empty tool list.
    Unhealthy,
    /// The probe did not finish within the health timeout.
    Timeout,
    /// The probe failed.
    Error(String),
}

impl HealthStatus {
    /// Whether the agent is usable.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy { .. })
    }
}

impl Display for HealthStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy { tools } => write!(f, "healthy ({tools} tools)"),
            Self::Unhealthy => f.write_str("unhealthy (no tools)"),
            Self::Timeout => f.write_str("timeout"),
            Self::Error(cause) => {
                let short: String = cause.chars().take(50).collect();
                write!(f, "error: {short}")
            }
        }
    }
}

/// Fold optional conversation context into the prompt.
#[must_use]
pub fn compose_prompt(prompt: &str, context: Option<&str>) -> String {
    match context.map(str::trim) {
        Some(context) if !context.is_empty() => {
            format!("Previous context:\n{context}\n\nCurrent request: {prompt}")
        }
        _ => prompt.to_owned(),
    }
}

/// Parameters of a prompt request for `agent`.
#[must_use]
pub fn call_params(agent: &AgentEndpoint, prompt: &str) -> Value {
    json!({
        "name": agent.tool_name,
        "arguments": {
            "prompt": prompt,
            "cwd": agent.working_dir,
        }
    })
}

/// Entry point for talking to configured agents.
#[derive(Debug, Clone)]
pub struct AgentClient {
    registry: Arc<AgentRegistry>,
    outbound: Outbound,
    settings: SessionSettings,
    timeouts: TimeoutConfig,
}

impl AgentClient {
    /// Build a client with its own HTTP pool from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the HTTP client cannot be built.
    pub fn from_config(config: &GlobalConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeouts.connect())
            .build()?;
        Ok(Self::with_http(config, http))
    }

    /// Build a client around an existing HTTP client.
    #[must_use]
    pub fn with_http(config: &GlobalConfig, http: reqwest::Client) -> Self {
        Self {
            registry: Arc::new(AgentRegistry::from_agents(config.agents.iter().cloned())),
            outbound: Outbound::new(http, Arc::new(RequestIds::new()))
                .with_post_timeout(config.timeouts.longest_request(&config.agents)),
            settings: SessionSettings::from_config(config),
            timeouts: config.timeouts.clone(),
        }
    }

    /// The agent registry.
    #[must_use]
    pub fn agents(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Stream an answer to `prompt`.
    ///
    /// The returned stream is lazy: no connection is opened until it is first
    /// polled, and dropping it closes the connection. Deltas arrive as
    /// `Chunk`/`Reasoning`; the last item is `Result` or `Error`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownAgent` before any I/O.
    pub fn call_stream(&self, agent: &str, prompt: &str, context: Option<&str>) -> Result<ChunkStream> {
        let typed = self.prompt_stream(agent, prompt, context, true)?;
        Ok(stream::into_chunks(typed))
    }

    /// Ask `agent` and wait for the collected answer.
    ///
    /// # Errors
    ///
    /// - `AppError::UnknownAgent`: before any I/O.
    /// - Transport, handshake, remote, timeout, or stream-closed failures of
    ///   the underlying session.
    pub async fn call(&self, agent: &str, prompt: &str, context: Option<&str>) -> Result<CallOutcome> {
        let typed = self.prompt_stream(agent, prompt, context, false)?;
        let outcome = stream::collect(typed).await?;
        info!(
            agent,
            chars = outcome.text.as_deref().map_or(0, str::len),
            partial = outcome.partial,
            "call finished"
        );
        Ok(outcome)
    }

    /// List the tools `agent` offers.
    ///
    /// # Errors
    ///
    /// Same failures as [`AgentClient::call`], plus `AppError::Protocol` if
    /// the tool list is malformed.
    pub async fn list_tools(&self, agent: &str) -> Result<Vec<ToolInfo>> {
        let endpoint = self.registry.get(agent)?;
        let op = Operation {
            method: LIST_METHOD.into(),
            params: json!({}),
            live: false,
            wait_ready: false,
            deadline: self.timeouts.request_for(endpoint),
        };
        let outcome = stream::collect(self.open(endpoint, op)).await?;
        let tools = outcome
            .payload
            .as_ref()
            .and_then(|payload| payload.get("tools"))
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let tools: Vec<ToolInfo> = serde_json::from_value(tools)?;
        debug!(agent, count = tools.len(), "tools listed");
        Ok(tools)
    }

    /// Probe one agent under the health timeout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownAgent` for unregistered names; every other
    /// failure is folded into the returned status.
    pub async fn probe(&self, agent: &str) -> Result<HealthStatus> {
        self.registry.get(agent)?;
        let status = match tokio::time::timeout(self.timeouts.health(), self.list_tools(agent)).await {
            Err(_) => HealthStatus::Timeout,
            Ok(Ok(tools)) if tools.is_empty() => HealthStatus::Unhealthy,
            Ok(Ok(tools)) => HealthStatus::Healthy { tools: tools.len() },
            Ok(Err(err)) => HealthStatus::Error(err.to_string()),
        };
        if !status.is_healthy() {
            warn!(agent, %status, "health probe failed");
        }
        Ok(status)
    }

    /// Probe every registered agent concurrently.
    pub async fn health_check(&self) -> BTreeMap<String, HealthStatus> {
        let probes = self.registry.iter().map(|agent| async move {
            let status = self
                .probe(&agent.name)
                .await
                .unwrap_or_else(|err| HealthStatus::Error(err.to_string()));
            (agent.name.clone(), status)
        });
        join_all(probes).await.into_iter().collect()
    }

    fn prompt_stream(
        &self,
        agent: &str,
        prompt: &str,
        context: Option<&str>,
        live: bool,
    ) -> Result<TypedChunkStream> {
        let endpoint = self.registry.get(agent)?;
        let prompt = compose_prompt(prompt, context);
        let op = Operation {
            method: CALL_METHOD.into(),
            params: call_params(endpoint, &prompt),
            live,
            wait_ready: true,
            deadline: self.timeouts.request_for(endpoint),
        };
        Ok(self.open(endpoint, op))
    }

    fn open(&self, endpoint: &AgentEndpoint, op: Operation) -> TypedChunkStream {
        stream::run(
            self.outbound.clone(),
            endpoint.clone(),
            self.settings.clone(),
            op,
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
