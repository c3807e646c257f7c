//! Agent subprocess launcher.
//!
//! The child inherits the gateway's environment and working directory; its
//! three standard streams are piped back to the gateway and it is killed if
//! the handle is dropped.

use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::info;

use crate::{AppError, Result};

/// Program and arguments of the wrapped agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    /// Executable to launch.
    pub program: String,
    /// Arguments passed verbatim.
    pub args: Vec<String>,
}

impl AgentCommand {
    /// Split an argv vector into program and arguments.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `argv` is empty.
    pub fn from_argv(argv: Vec<String>) -> Result<Self> {
        let mut argv = argv.into_iter();
        let program = argv
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| AppError::Config("agent command must not be empty".into()))?;
        Ok(Self {
            program,
            args: argv.collect(),
        })
    }
}

/// A running child with its stdio halves detached from the handle.
#[derive(Debug)]
pub struct SpawnedAgent {
    /// Process handle, kept alive so `kill_on_drop` applies.
    pub child: Child,
    /// Child stdin, fed by the input duty.
    pub stdin: ChildStdin,
    /// Child stdout, consumed by the output duty.
    pub stdout: ChildStdout,
    /// Child stderr, consumed by the error duty.
    pub stderr: ChildStderr,
}

/// Launch `command` with all three streams piped.
///
/// # Errors
///
/// Returns `AppError::Gateway` if the process cannot be spawned or a pipe
/// cannot be captured.
pub fn spawn_agent(command: &AgentCommand) -> Result<SpawnedAgent> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| AppError::Gateway(format!("failed to spawn {}: {err}", command.program)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Gateway("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Gateway("failed to capture agent stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Gateway("failed to capture agent stderr".into()))?;

    info!(program = %command.program, pid = child.id(), "agent process started");

    Ok(SpawnedAgent {
        child,
        stdin,
        stdout,
        stderr,
    })
}
