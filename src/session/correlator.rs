//! Request identifiers and message submission.
//!
//! [`RequestIds`] is the only state shared between concurrent calls. Every
//! request sent through [`Outbound`] takes a fresh id from it; the id is the
//! sole key the aggregator later uses to claim the response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::rpc::{RpcNotification, RpcRequest};
use crate::{AppError, Result};

/// Process-wide, strictly increasing JSON-RPC id source.
#[derive(Debug)]
pub struct RequestIds(AtomicU64);

impl RequestIds {
    /// Start a fresh id space at 1.
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Claim the next id. Never returns the same value twice.
    pub fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP response to a submitted message.
#[derive(Debug, Clone)]
pub struct Posted {
    /// Status returned by the submission endpoint.
    pub status: StatusCode,
    /// Raw response body.
    pub body: String,
}

impl Posted {
    /// Whether the server accepted the message (200 or 202).
    #[must_use]
    pub fn accepted(&self) -> bool {
        self.status == StatusCode::OK || self.status == StatusCode::ACCEPTED
    }

    /// The body as a JSON-RPC message, for servers that answer inline.
    #[must_use]
    pub fn inline(&self) -> Option<Value> {
        let body = self.body.trim();
        if !body.starts_with('{') {
            return None;
        }
        serde_json::from_str(body).ok()
    }
}

/// A request that was accepted by the server.
#[derive(Debug, Clone)]
pub struct Sent {
    /// Correlation id to claim the response with.
    pub id: u64,
    /// Response delivered in the POST body instead of the push stream.
    pub inline: Option<Value>,
}

/// Shared HTTP client plus id source.
///
/// Cheap to clone; all clones share one connection pool and one id space.
#[derive(Debug, Clone)]
pub struct Outbound {
    http: reqwest::Client,
    ids: Arc<RequestIds>,
    post_timeout: Option<Duration>,
}

impl Outbound {
    /// Combine a client and an id source.
    #[must_use]
    pub fn new(http: reqwest::Client, ids: Arc<RequestIds>) -> Self {
        Self {
            http,
            ids,
            post_timeout: None,
        }
    }

    /// Bound every POST, body included, by `limit`.
    #[must_use]
    pub fn with_post_timeout(mut self, limit: Duration) -> Self {
        self.post_timeout = Some(limit);
        self
    }

    /// Underlying HTTP client.
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Claim the next request id.
    pub fn next_id(&self) -> u64 {
        self.ids.next_id()
    }

    /// POST a JSON body to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the request cannot be delivered.
    pub async fn post<T: Serialize + ?Sized>(&self, endpoint: &Url, body: &T) -> Result<Posted> {
        let mut request = self.http.post(endpoint.clone()).json(body);
        if let Some(limit) = self.post_timeout {
            request = request.timeout(limit);
        }
        let response = request
            .send()
            .await
            .map_err(|err| AppError::Transport(format!("POST {endpoint} failed: {err}")))?;
        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                warn!(%endpoint, %status, error = %err, "response body unreadable, treating as empty");
                String::new()
            }
        };
        Ok(Posted { status, body })
    }

    /// Send `method` with a freshly assigned id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if delivery fails or the server does not
    /// answer 200/202.
    pub async fn send(&self, endpoint: &Url, method: &str, params: Value) -> Result<Sent> {
        let id = self.next_id();
        self.send_with_id(endpoint, method, params, id).await
    }

    /// Send `method` with a caller-supplied id.
    ///
    /// # Errors
    ///
    /// Same as [`Outbound::send`].
    pub async fn send_with_id(
        &self,
        endpoint: &Url,
        method: &str,
        params: Value,
        id: u64,
    ) -> Result<Sent> {
        let request = RpcRequest::new(method, params, id);
        let posted = self.post(endpoint, &request).await?;
        if !posted.accepted() {
            return Err(rejected(method, &posted));
        }
        debug!(method, request_id = id, status = %posted.status, "request accepted");
        Ok(Sent {
            id,
            inline: posted.inline(),
        })
    }

    /// Send a notification (no id, no response expected).
    ///
    /// # Errors
    ///
    /// Same as [`Outbound::send`].
    pub async fn notify(&self, endpoint: &Url, method: &str, params: Value) -> Result<()> {
        let note = RpcNotification::new(method, params);
        let posted = self.post(endpoint, &note).await?;
        if !posted.accepted() {
            return Err(rejected(method, &posted));
        }
        debug!(method, status = %posted.status, "notification accepted");
        Ok(())
    }
}

fn rejected(method: &str, posted: &Posted) -> AppError {
    AppError::Transport(format!(
        "{method} rejected with {}: {}",
        posted.status,
        posted.body.trim()
    ))
}
