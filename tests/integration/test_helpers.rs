//! Shared helpers for integration tests.
//!
//! [`MockAgent`] is an in-process axum server speaking the agent side of the
//! SSE session protocol: `GET /sse` announces `/messages/?session_id=N`, and
//! `POST /messages/` answers the handshake itself and delegates every other
//! request to a scripted [`Responder`].

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{stream, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use agent_bridge::config::GlobalConfig;

/// What the mock does with one operational request.
#[derive(Debug, Clone)]
pub struct Reply {
    /// HTTP status of the POST.
    pub status: StatusCode,
    /// JSON body of the POST, for inline answers.
    pub inline: Option<Value>,
    /// Messages pushed on the session's event stream.
    pub push: Vec<Value>,
    /// Close the event stream after pushing.
    pub close: bool,
    /// Never answer the POST.
    pub hang: bool,
}

impl Reply {
    /// Accept and push `msgs`.
    pub fn push(msgs: Vec<Value>) -> Self {
        Self {
            status: StatusCode::ACCEPTED,
            inline: None,
            push: msgs,
            close: false,
            hang: false,
        }
    }

    /// Accept, push `msgs`, then close the stream.
    pub fn close_after(msgs: Vec<Value>) -> Self {
        Self {
            close: true,
            ..Self::push(msgs)
        }
    }

    /// Accept without pushing anything.
    pub fn silent() -> Self {
        Self::push(Vec::new())
    }

    /// Refuse the request.
    pub fn reject(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::silent()
        }
    }

    /// Accept the connection but never answer the POST.
    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Self::silent()
        }
    }

    /// Answer in the POST body.
    pub fn inline(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            inline: Some(body),
            ..Self::silent()
        }
    }
}

/// Script for operational requests: `(method, id, params) -> Reply`.
pub type Responder = Arc<dyn Fn(&str, u64, &Value) -> Reply + Send + Sync>;

/// Mock behaviour switches.
#[derive(Debug, Clone, Copy)]
pub struct MockOptions {
    /// Send the `endpoint` event; when `false` the stream closes at once.
    pub announce_endpoint: bool,
    /// Push a native `session_configured` after `notifications/initialized`.
    pub ready_marker: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            announce_endpoint: true,
            ready_marker: true,
        }
    }
}

struct MockState {
    responder: Responder,
    options: MockOptions,
    sessions: Mutex<HashMap<String, mpsc::UnboundedSender<Event>>>,
    next_session: AtomicU64,
    received: Mutex<Vec<Value>>,
    streams_opened: AtomicU64,
}

/// A running mock agent server.
pub struct MockAgent {
    /// `http://127.0.0.1:<port>`.
    pub base_url: String,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockAgent {
    /// Start a mock with default options.
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&str, u64, &Value) -> Reply + Send + Sync + 'static,
    {
        Self::start_with(responder, MockOptions::default()).await
    }

    /// Start a mock with explicit options.
    pub async fn start_with<F>(responder: F, options: MockOptions) -> Self
    where
        F: Fn(&str, u64, &Value) -> Reply + Send + Sync + 'static,
    {
        let state = Arc::new(MockState {
            responder: Arc::new(responder),
            options,
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            received: Mutex::new(Vec::new()),
            streams_opened: AtomicU64::new(0),
        });

        let app = Router::new()
            .route("/sse", get(open_stream))
            .route("/messages/", post(submit))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock agent");
        let addr = listener.local_addr().expect("local addr");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock agent server");
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            handle,
        }
    }

    /// Every message POSTed so far, in arrival order.
    pub fn received(&self) -> Vec<Value> {
        self.state.received.lock().expect("lock").clone()
    }

    /// Methods of every message POSTed so far.
    pub fn methods(&self) -> Vec<String> {
        self.received()
            .iter()
            .map(|msg| msg["method"].as_str().unwrap_or_default().to_owned())
            .collect()
    }

    /// Received messages with the given method.
    pub fn requests(&self, method: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|msg| msg["method"] == method)
            .collect()
    }

    /// Number of `GET /sse` connections accepted.
    pub fn streams_opened(&self) -> u64 {
        self.state.streams_opened.load(Ordering::SeqCst)
    }
}

impl Drop for MockAgent {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn open_stream(
    State(state): State<Arc<MockState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    state.streams_opened.fetch_add(1, Ordering::SeqCst);
    let session = state.next_session.fetch_add(1, Ordering::SeqCst).to_string();
    let (tx, rx) = mpsc::unbounded_channel();

    if state.options.announce_endpoint {
        let _ = tx.send(
            Event::default()
                .event("endpoint")
                .data(format!("/messages/?session_id={session}")),
        );
        state
            .sessions
            .lock()
            .expect("lock")
            .insert(session, tx);
    }

    let events = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    })
    .map(Ok::<Event, Infallible>);
    Sse::new(events)
}

async fn submit(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
    Json(msg): Json<Value>,
) -> Response {
    state.received.lock().expect("lock").push(msg.clone());

    let method = msg["method"].as_str().unwrap_or_default().to_owned();
    let reply = match (method.as_str(), msg["id"].as_u64()) {
        ("initialize", Some(id)) => Reply::push(vec![json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"protocolVersion": "0.1.0", "capabilities": {"tools": {}}, "serverInfo": {"name": "mock"}}
        })]),
        ("notifications/initialized", None) if state.options.ready_marker => {
            Reply::push(vec![native(json!({"type": "session_configured", "model": "mock"}))])
        }
        (_, None) => Reply::silent(),
        (method, Some(id)) => (state.responder)(method, id, &msg["params"]),
    };

    if reply.hang {
        std::future::pending::<()>().await;
    }

    let session = query.get("session_id").cloned().unwrap_or_default();
    let mut sessions = state.sessions.lock().expect("lock");
    if let Some(tx) = sessions.get(&session) {
        for pushed in &reply.push {
            let _ = tx.send(Event::default().data(pushed.to_string()));
        }
    }
    if reply.close {
        sessions.remove(&session);
    }
    drop(sessions);

    match reply.inline {
        Some(body) => (reply.status, Json(body)).into_response(),
        None => reply.status.into_response(),
    }
}

/// Wrap `msg` in a native `codex/event` envelope.
pub fn native(msg: Value) -> Value {
    json!({"jsonrpc": "2.0", "method": "codex/event", "params": {"msg": msg}})
}

/// Native message delta.
pub fn delta(text: &str) -> Value {
    native(json!({"type": "agent_message_delta", "delta": text}))
}

/// Native task completion.
pub fn task_complete(last: Option<&str>) -> Value {
    native(json!({"type": "task_complete", "last_agent_message": last}))
}

/// Successful tool result for `id`.
pub fn text_result(id: u64, text: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": {"content": [{"type": "text", "text": text}]}})
}

/// Configuration with one agent per `(name, base_url)` and short waits.
///
/// Timeouts are public fields; tests adjust them on the returned value.
pub fn test_config(agents: &[(&str, &str)]) -> GlobalConfig {
    let mut toml = String::from(
        "[timeouts]\nhandshake_seconds = 2\nready_wait_millis = 500\nrequest_seconds = 5\nidle_seconds = 5\nhealth_seconds = 2\n",
    );
    for (name, base_url) in agents {
        toml.push_str(&format!(
            "\n[[agents]]\nname = \"{name}\"\nbase_url = \"{base_url}\"\nworking_dir = \"/tmp/{name}\"\n"
        ));
    }
    GlobalConfig::from_toml_str(&toml).expect("valid test config")
}
