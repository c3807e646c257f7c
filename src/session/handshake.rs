//! Session handshake over a push-event connection.
//!
//! Before any operational method is usable the agent server expects:
//!
//! 1. **endpoint discovery**: the first SSE event named `endpoint` carries
//!    the message-submission URL as plain text (absolute, or a path relative
//!    to the base address);
//! 2. **`initialize`**: a request with the protocol version, declared
//!    capabilities, and client identity;
//! 3. **`notifications/initialized`**: a notification without an id.
//!
//! Servers that skip straight to operational requests silently drop them, so
//! both sends must be accepted (HTTP 200 or 202) for the handshake to
//! succeed. The whole exchange is bounded by the handshake timeout.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde_json::{json, Value};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::correlator::Outbound;
use super::sse::{EventConnection, ENDPOINT_EVENT};
use super::SessionSettings;
use crate::config::{AgentEndpoint, ClientConfig};
use crate::{AppError, Result};

/// Method name of the initialization request.
pub const INITIALIZE_METHOD: &str = "initialize";

/// Method name of the post-initialization notification.
pub const INITIALIZED_METHOD: &str = "notifications/initialized";

/// Where to submit messages for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    /// Message-submission URL (carries the server's session id).
    pub endpoint: Url,
    /// When the endpoint became known.
    pub created_at: DateTime<Utc>,
    /// `true` when the endpoint was constructed locally because the server
    /// closed the stream without announcing one.
    pub fallback: bool,
}

/// An initialized session: its handle plus the still-open event stream.
#[derive(Debug)]
pub struct Session {
    /// Submission endpoint.
    pub handle: SessionHandle,
    /// Push-event connection carrying responses and notifications.
    pub conn: EventConnection,
}

/// Open the push connection for `agent` and run the full handshake.
///
/// # Errors
///
/// - `AppError::Transport`: the event stream could not be opened.
/// - `AppError::Handshake`: no endpoint event within the timeout, or the
///   server rejected `initialize` / `initialized`.
pub async fn establish(
    outbound: &Outbound,
    agent: &AgentEndpoint,
    settings: &SessionSettings,
) -> Result<Session> {
    let deadline = Instant::now() + settings.handshake;
    let base = agent.base()?;

    let mut conn = EventConnection::open(outbound.http(), &agent.sse_url(), settings.idle).await?;
    let handle = discover_endpoint(&mut conn, &base, deadline, settings.handshake).await?;

    let init_id = outbound.next_id();
    timeout_at(
        deadline,
        initialize(outbound, &handle.endpoint, init_id, &settings.client),
    )
    .await
    .map_err(|_| {
        AppError::Handshake(format!(
            "initialize not accepted within {:?}",
            settings.handshake
        ))
    })??;

    info!(
        agent = %agent.name,
        endpoint = %handle.endpoint,
        fallback = handle.fallback,
        "session established"
    );
    Ok(Session { handle, conn })
}

/// Wait for the `endpoint` event and resolve it against `base`.
///
/// Non-endpoint frames seen before it are skipped. If the stream closes
/// first, a fallback endpoint with a random session token is used.
///
/// # Errors
///
/// - `AppError::Handshake`: `deadline` passed without an endpoint event, or
///   the announced endpoint is not a valid URL.
/// - `AppError::Transport`: the stream failed.
pub async fn discover_endpoint(
    conn: &mut EventConnection,
    base: &Url,
    deadline: Instant,
    limit: Duration,
) -> Result<SessionHandle> {
    loop {
        let frame = timeout_at(deadline, conn.next_frame())
            .await
            .map_err(|_| AppError::Handshake(format!("no endpoint event within {limit:?}")))??;

        match frame {
            Some(frame) if frame.event == ENDPOINT_EVENT => {
                let endpoint = resolve_endpoint(base, &frame.data)?;
                debug!(%endpoint, "handshake: endpoint announced");
                return Ok(SessionHandle {
                    endpoint,
                    created_at: Utc::now(),
                    fallback: false,
                });
            }
            Some(frame) => {
                debug!(event = %frame.event, "handshake: skipping event before endpoint");
            }
            None => {
                let endpoint = fallback_endpoint(base)?;
                warn!(
                    %endpoint,
                    "handshake: stream closed before endpoint event, using fallback endpoint"
                );
                return Ok(SessionHandle {
                    endpoint,
                    created_at: Utc::now(),
                    fallback: true,
                });
            }
        }
    }
}

/// Send `initialize` followed by `notifications/initialized`.
///
/// # Errors
///
/// Returns `AppError::Handshake` if either message is not accepted.
pub async fn initialize(
    outbound: &Outbound,
    endpoint: &Url,
    init_id: u64,
    client: &ClientConfig,
) -> Result<()> {
    outbound
        .send_with_id(endpoint, INITIALIZE_METHOD, initialize_params(client), init_id)
        .await
        .map_err(|err| AppError::Handshake(format!("initialize failed: {err}")))?;
    debug!(request_id = init_id, "handshake: initialize accepted");

    outbound
        .notify(endpoint, INITIALIZED_METHOD, json!({}))
        .await
        .map_err(|err| AppError::Handshake(format!("initialized failed: {err}")))?;
    debug!("handshake: initialized accepted");

    Ok(())
}

/// Parameters of the `initialize` request.
#[must_use]
pub fn initialize_params(client: &ClientConfig) -> Value {
    json!({
        "protocolVersion": client.protocol_version,
        "capabilities": {
            "tools": {},
            "prompts": {},
            "resources": {}
        },
        "clientInfo": {
            "name": client.name,
            "version": client.version
        }
    })
}

/// Resolve the `endpoint` event payload against the base address.
///
/// # Errors
///
/// Returns `AppError::Handshake` if the payload is empty or not a URL.
pub fn resolve_endpoint(base: &Url, data: &str) -> Result<Url> {
    let data = data.trim();
    if data.is_empty() {
        return Err(AppError::Handshake("endpoint event was empty".into()));
    }
    let resolved = if data.starts_with("http://") || data.starts_with("https://") {
        Url::parse(data)
    } else {
        base.join(data)
    };
    resolved.map_err(|err| AppError::Handshake(format!("invalid endpoint {data:?}: {err}")))
}

/// Construct `{base}/messages/?session_id=<uuid>`.
///
/// # Errors
///
/// Returns `AppError::Handshake` if the result is not a valid URL.
pub fn fallback_endpoint(base: &Url) -> Result<Url> {
    let raw = format!(
        "{}/messages/?session_id={}",
        base.as_str().trim_end_matches('/'),
        Uuid::new_v4()
    );
    Url::parse(&raw).map_err(|err| AppError::Handshake(format!("invalid fallback endpoint: {err}")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
