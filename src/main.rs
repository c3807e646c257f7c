#![forbid(unsafe_code)]

//! `agent-bridge`: command-line client for configured agent servers.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_bridge::events::StreamChunk;
use agent_bridge::{AgentClient, AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-bridge", about = "Talk to SSE agent servers", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a prompt to an agent and print its answer.
    Ask {
        /// Registered agent name.
        agent: String,
        /// Prompt text.
        prompt: String,
        /// Print the answer as it streams in.
        #[arg(long)]
        stream: bool,
        /// Earlier conversation to prepend to the prompt.
        #[arg(long)]
        context: Option<String>,
    },
    /// List the tools an agent offers.
    Tools {
        /// Registered agent name.
        agent: String,
    },
    /// Probe every configured agent.
    Health,
    /// List configured agents.
    Agents,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = GlobalConfig::load_from_path(&args.config)?;
    info!(agents = config.agents.len(), "configuration loaded");
    let client = AgentClient::from_config(&config)?;

    match args.command {
        Command::Ask {
            agent,
            prompt,
            stream,
            context,
        } => {
            if stream {
                ask_streaming(&client, &agent, &prompt, context.as_deref()).await
            } else {
                let outcome = client.call(&agent, &prompt, context.as_deref()).await?;
                println!("{}", outcome.text.unwrap_or_default());
                Ok(())
            }
        }
        Command::Tools { agent } => {
            let tools = client.list_tools(&agent).await?;
            println!("{}", serde_json::to_string_pretty(&tools)?);
            Ok(())
        }
        Command::Health => {
            for (name, status) in client.health_check().await {
                println!("{name}: {status}");
            }
            Ok(())
        }
        Command::Agents => {
            for agent in client.agents().iter() {
                println!("{}\t{}\t{}", agent.name, agent.base_url, agent.tool_name);
            }
            Ok(())
        }
    }
}

async fn ask_streaming(client: &AgentClient, agent: &str, prompt: &str, context: Option<&str>) -> Result<()> {
    let mut chunks = client.call_stream(agent, prompt, context)?;
    let mut stdout = std::io::stdout();
    let mut printed = false;

    while let Some(chunk) = chunks.next().await {
        match chunk {
            StreamChunk::Chunk(delta) => {
                write!(stdout, "{delta}")?;
                stdout.flush()?;
                printed = true;
            }
            StreamChunk::Reasoning(delta) => debug!(%delta, "reasoning"),
            StreamChunk::Result(outcome) => {
                if !printed {
                    write!(stdout, "{}", outcome.text.unwrap_or_default())?;
                }
                writeln!(stdout)?;
                return Ok(());
            }
            StreamChunk::Error(cause) => return Err(AppError::Remote(cause)),
        }
    }
    Ok(())
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
