//! Process boundary translator.
//!
//! Wraps an agent subprocess that speaks line-delimited JSON-RPC on its
//! stdio, and makes its output consumable by SSE-side clients:
//!
//! - `codec`: 1 MiB-bounded line framing.
//! - `filter`: banner removal and native-event translation per line.
//! - `forward`: the input, output, and error forwarding duties.
//! - `spawner`: subprocess launch with piped stdio.
//!
//! A [`Gateway`] moves through `Starting → Running → Draining → Stopped`.
//! Draining is entered only on cancellation; a child that exits by itself
//! goes straight to `Stopped`.

pub mod codec;
pub mod filter;
pub mod forward;
pub mod spawner;

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{AppError, Result};
use spawner::{spawn_agent, AgentCommand, SpawnedAgent};

/// Default file receiving the child's stderr.
pub const DEFAULT_STDERR_LOG: &str = "/tmp/codex-mcp-stderr.log";

/// Default wait between SIGTERM and a forced kill.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(500);

/// Exit code used when the child's status carries neither code nor signal.
const UNKNOWN_EXIT: i32 = 1;

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Agent command line.
    pub command: AgentCommand,
    /// Append-only sink for the child's stderr.
    pub stderr_log: PathBuf,
    /// Grace period after SIGTERM, also the bound on output draining once the
    /// child has exited.
    pub grace: Duration,
}

impl GatewayConfig {
    /// Settings with default log path and grace period.
    #[must_use]
    pub fn new(command: AgentCommand) -> Self {
        Self {
            command,
            stderr_log: PathBuf::from(DEFAULT_STDERR_LOG),
            grace: DEFAULT_GRACE,
        }
    }
}

/// Lifecycle state of a [`Gateway`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    /// Launching the child.
    Starting,
    /// Forwarding in both directions.
    Running,
    /// Terminating the child after cancellation.
    Draining,
    /// Child reaped; exit code known.
    Stopped,
}

/// One wrapped agent subprocess.
#[derive(Debug)]
pub struct Gateway {
    config: GatewayConfig,
    state: GatewayState,
}

impl Gateway {
    /// Create a gateway in the `Starting` state.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            state: GatewayState::Starting,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> GatewayState {
        self.state
    }

    /// Run against the process's own stdin and stdout.
    ///
    /// # Errors
    ///
    /// See [`Gateway::run_with_io`].
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<i32> {
        self.run_with_io(tokio::io::stdin(), tokio::io::stdout(), cancel)
            .await
    }

    /// Spawn the child, forward until it exits or `cancel` fires, and return
    /// the exit code to propagate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Gateway` if the child could not be spawned, waited
    /// on, or killed. Failures of the forwarding duties are logged and never
    /// replace the child's exit code.
    pub async fn run_with_io<I, O>(&mut self, input: I, output: O, cancel: CancellationToken) -> Result<i32>
    where
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin + Send + 'static,
    {
        self.transition(GatewayState::Starting);
        let SpawnedAgent {
            mut child,
            stdin,
            stdout,
            stderr,
        } = spawn_agent(&self.config.command)?;
        self.transition(GatewayState::Running);

        let input_cancel = CancellationToken::new();
        let output_cancel = CancellationToken::new();
        let input_task = tokio::spawn(forward::forward_input(input, stdin, input_cancel.clone()));
        let output_task = tokio::spawn(forward::forward_output(stdout, output, output_cancel.clone()));
        let errors_task = {
            let path = self.config.stderr_log.clone();
            let cancel = output_cancel.clone();
            tokio::spawn(async move { forward::forward_errors(stderr, &path, cancel).await })
        };

        let exited = tokio::select! {
            status = child.wait() => Some(status),
            () = cancel.cancelled() => None,
        };
        let status = match exited {
            Some(status) => status.map_err(|e| AppError::Gateway(format!("wait for agent failed: {e}")))?,
            None => {
                self.transition(GatewayState::Draining);
                self.drain(&mut child).await?
            }
        };

        input_cancel.cancel();
        let grace = self.config.grace;
        let stats = settle(output_task, grace, &output_cancel).await.unwrap_or_default();
        let logged = settle(errors_task, grace, &output_cancel).await.unwrap_or_default();
        input_task.abort();

        let code = exit_code(status);
        self.transition(GatewayState::Stopped);
        info!(
            code,
            emitted = stats.emitted,
            dropped = stats.dropped,
            stderr_bytes = logged,
            "agent process stopped"
        );
        Ok(code)
    }

    async fn drain(&self, child: &mut Child) -> Result<ExitStatus> {
        terminate(child);
        match tokio::time::timeout(self.config.grace, child.wait()).await {
            Ok(status) => status.map_err(|e| AppError::Gateway(format!("wait for agent failed: {e}"))),
            Err(_) => {
                warn!(grace = ?self.config.grace, "agent ignored SIGTERM, killing");
                child
                    .kill()
                    .await
                    .map_err(|e| AppError::Gateway(format!("kill failed: {e}")))?;
                child
                    .wait()
                    .await
                    .map_err(|e| AppError::Gateway(format!("wait for agent failed: {e}")))
            }
        }
    }

    fn transition(&mut self, next: GatewayState) {
        debug!(from = ?self.state, to = ?next, "gateway state change");
        self.state = next;
    }
}

/// Wait up to `grace` for a duty to reach EOF, then cancel and join it.
///
/// A duty that panicked yields `None`; the child's exit code still stands.
async fn settle<T>(mut task: JoinHandle<T>, grace: Duration, cancel: &CancellationToken) -> Option<T> {
    let joined = match tokio::time::timeout(grace, &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            debug!("forwarding duty still open after child exit, cancelling");
            cancel.cancel();
            task.await
        }
    };
    match joined {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(%err, "forwarding task failed");
            None
        }
    }
}

/// Exit code to propagate for `status`: the child's own code, or 128 plus
/// the signal number when it was killed by a signal.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    UNKNOWN_EXIT
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        debug!("agent already reaped, nothing to signal");
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        warn!(pid, %err, "SIGTERM failed, falling back to kill");
        if let Err(err) = child.start_kill() {
            warn!(pid, %err, "kill failed");
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        warn!(%err, "kill failed");
    }
}
