//! Lazy per-request driver.
//!
//! [`run`] returns a stream that does nothing until first polled. The first
//! poll opens the push connection, performs the handshake, optionally waits
//! for the agent's readiness marker, sends the request, and from then on
//! feeds every frame to the request's [`Aggregator`]. Dropping the stream at
//! any point drops the connection with it.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{stream, Stream, StreamExt};
use serde_json::Value;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::aggregator::{Aggregator, Outbox, Progress};
use super::correlator::Outbound;
use super::handshake::establish;
use super::sse::EventConnection;
use super::SessionSettings;
use crate::config::AgentEndpoint;
use crate::events::{decode_wire, CallOutcome, StreamChunk, StreamEvent};
use crate::{AppError, Result};

/// Caller-facing chunk sequence; failures arrive as [`StreamChunk::Error`].
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Chunk sequence with typed failures, used by collecting callers.
pub type TypedChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// One operational request.
#[derive(Debug, Clone)]
pub struct Operation {
    /// JSON-RPC method.
    pub method: String,
    /// Method parameters.
    pub params: Value,
    /// Yield deltas as they arrive.
    pub live: bool,
    /// Wait for `session_configured` before sending.
    pub wait_ready: bool,
    /// Whole-request deadline, handshake included.
    pub deadline: Duration,
}

/// Build the lazy stream for `op` against `agent`.
#[must_use]
pub fn run(
    outbound: Outbound,
    agent: AgentEndpoint,
    settings: SessionSettings,
    op: Operation,
) -> TypedChunkStream {
    let driver = Driver {
        outbound,
        agent,
        settings,
        op,
        phase: Phase::Idle,
        out: Outbox::new(),
    };
    Box::pin(stream::unfold(driver, |mut driver| async move {
        let item = driver.next_item().await?;
        Some((item, driver))
    }))
}

/// Render typed failures as error chunks.
#[must_use]
pub fn into_chunks(typed: TypedChunkStream) -> ChunkStream {
    Box::pin(typed.map(|item| item.unwrap_or_else(|err| StreamChunk::Error(err.to_string()))))
}

/// Drain a stream to its terminal result.
///
/// # Errors
///
/// Returns the failure the stream ended with, or `AppError::StreamClosed`
/// if it ended without a terminal item.
pub async fn collect(mut typed: TypedChunkStream) -> Result<CallOutcome> {
    while let Some(item) = typed.next().await {
        match item? {
            StreamChunk::Result(outcome) => return Ok(outcome),
            StreamChunk::Error(cause) => return Err(AppError::Remote(cause)),
            StreamChunk::Chunk(_) | StreamChunk::Reasoning(_) => {}
        }
    }
    Err(AppError::StreamClosed("no terminal item".into()))
}

enum Phase {
    Idle,
    Streaming {
        conn: EventConnection,
        agg: Aggregator,
        deadline: Instant,
    },
    Done,
}

struct Driver {
    outbound: Outbound,
    agent: AgentEndpoint,
    settings: SessionSettings,
    op: Operation,
    phase: Phase,
    out: Outbox,
}

impl Driver {
    async fn next_item(&mut self) -> Option<Result<StreamChunk>> {
        loop {
            if let Some(item) = self.out.pop_front() {
                return Some(item);
            }

            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Done => return None,
                Phase::Idle => match self.start().await {
                    Ok(Some(streaming)) => self.phase = streaming,
                    Ok(None) => {}
                    Err(err) => {
                        warn!(agent = %self.agent.name, method = %self.op.method, error = %err, "request failed before streaming");
                        self.out.push_back(Err(err));
                    }
                },
                Phase::Streaming {
                    mut conn,
                    mut agg,
                    deadline,
                } => {
                    if self.pump(&mut conn, &mut agg, deadline).await == Progress::Pending {
                        self.phase = Phase::Streaming {
                            conn,
                            agg,
                            deadline,
                        };
                    } else {
                        debug!(agent = %self.agent.name, request_id = agg.request_id(), "request finished");
                    }
                }
            }
        }
    }

    /// Handshake, readiness wait, and send. Returns `None` when the request
    /// already finished from buffered or inline messages.
    async fn start(&mut self) -> Result<Option<Phase>> {
        let deadline = Instant::now() + self.op.deadline;
        let mut session = establish(&self.outbound, &self.agent, &self.settings).await?;

        let mut backlog = VecDeque::new();
        if self.op.wait_ready {
            let ready = wait_ready(&mut session.conn, &mut backlog, self.settings.ready_wait).await?;
            debug!(agent = %self.agent.name, ready, buffered = backlog.len(), "readiness wait over");
        }

        let send = self
            .outbound
            .send(&session.handle.endpoint, &self.op.method, self.op.params.clone());
        let sent = timeout_at(deadline, send).await.map_err(|_| {
            AppError::Timeout(format!(
                "{} not accepted within {:?}",
                self.op.method, self.op.deadline
            ))
        })??;
        info!(
            agent = %self.agent.name,
            request_id = sent.id,
            method = %self.op.method,
            "request sent"
        );

        let mut agg = Aggregator::new(sent.id, self.op.live);
        backlog.extend(sent.inline);
        for msg in &backlog {
            if agg.apply(msg, &mut self.out) == Progress::Finished {
                return Ok(None);
            }
        }

        Ok(Some(Phase::Streaming {
            conn: session.conn,
            agg,
            deadline,
        }))
    }

    async fn pump(
        &mut self,
        conn: &mut EventConnection,
        agg: &mut Aggregator,
        deadline: Instant,
    ) -> Progress {
        let frame = match timeout_at(deadline, conn.next_frame()).await {
            Err(_) => {
                let cause = AppError::Timeout(format!("no result within {:?}", self.op.deadline));
                return agg.close(cause, &mut self.out);
            }
            Ok(Err(err)) => return agg.close(err, &mut self.out),
            Ok(Ok(None)) => {
                let cause = AppError::StreamClosed("event stream ended".into());
                return agg.close(cause, &mut self.out);
            }
            Ok(Ok(Some(frame))) => frame,
        };

        match frame.json() {
            Some(msg) => agg.apply(&msg, &mut self.out),
            None => Progress::Pending,
        }
    }
}

/// Wait up to `limit` for `session_configured`, waking on each frame.
///
/// Frames that arrive meanwhile are kept in `backlog` for the aggregator.
/// Returns whether the marker was seen; running out of time or a closed
/// stream are not errors.
async fn wait_ready(
    conn: &mut EventConnection,
    backlog: &mut VecDeque<Value>,
    limit: Duration,
) -> Result<bool> {
    let until = Instant::now() + limit;
    loop {
        let Ok(frame) = timeout_at(until, conn.next_frame()).await else {
            debug!(?limit, "no session_configured event, sending anyway");
            return Ok(false);
        };
        let Some(frame) = frame? else {
            return Ok(false);
        };
        let Some(msg) = frame.json() else {
            continue;
        };
        if matches!(decode_wire(&msg), Some(StreamEvent::ConnectionEstablished)) {
            return Ok(true);
        }
        backlog.push_back(msg);
    }
}
