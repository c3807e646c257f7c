//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Every variant is local to a single call or gateway instance; none of them
/// imply process-wide recovery.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Connection refused, DNS failure, non-acceptance status, or a
    /// mid-stream disconnect.
    Transport(String),
    /// Endpoint discovery or the initialize/initialized exchange failed.
    Handshake(String),
    /// A line or payload expected to be JSON-RPC could not be decoded.
    Protocol(String),
    /// The requested agent name is not in the registry.
    UnknownAgent(String),
    /// The push-event connection closed before any result was assembled.
    StreamClosed(String),
    /// The agent answered the request with a JSON-RPC error payload.
    Remote(String),
    /// A bounded wait elapsed.
    Timeout(String),
    /// Agent subprocess spawn, signal, or forwarding failure.
    Gateway(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::UnknownAgent(name) => write!(f, "unknown agent: {name}"),
            Self::StreamClosed(msg) => write!(f, "closed without response: {msg}"),
            Self::Remote(msg) => write!(f, "remote: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Gateway(msg) => write!(f, "gateway: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("malformed json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
