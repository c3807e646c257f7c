#![forbid(unsafe_code)]

//! `agent-bridge-gateway`: wraps a stdio agent so SSE-side clients can use it.
//!
//! Everything the gateway itself logs goes to stderr; stdout carries only the
//! translated protocol lines of the child.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use agent_bridge::gateway::spawner::AgentCommand;
use agent_bridge::gateway::{Gateway, GatewayConfig, DEFAULT_STDERR_LOG};
use agent_bridge::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "agent-bridge-gateway",
    about = "Stdio gateway for line-delimited JSON-RPC agents",
    version,
    long_about = None
)]
struct Cli {
    /// File the child's stderr is appended to.
    #[arg(long, default_value = DEFAULT_STDERR_LOG)]
    stderr_log: PathBuf,

    /// Milliseconds to wait after SIGTERM before killing the child.
    #[arg(long, default_value_t = 500)]
    grace_ms: u64,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Agent command and its arguments.
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

fn main() {
    let code = match bootstrap() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("agent-bridge-gateway: {err}");
            1
        }
    };
    std::process::exit(code);
}

fn bootstrap() -> Result<i32> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let code = runtime.block_on(run(args));

    // A pending read of our stdin occupies a blocking thread that cannot be
    // cancelled; do not wait for it.
    runtime.shutdown_background();
    code
}

async fn run(args: Cli) -> Result<i32> {
    let config = GatewayConfig {
        command: AgentCommand::from_argv(args.command)?,
        stderr_log: args.stderr_log,
        grace: Duration::from_millis(args.grace_ms),
    };
    info!(program = %config.command.program, stderr_log = %config.stderr_log.display(), "gateway starting");

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("termination signal received, draining agent");
        signal_ct.cancel();
    });

    let mut gateway = Gateway::new(config);
    gateway.run(ct).await
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
