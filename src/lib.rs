#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod rpc;
pub mod session;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use session::AgentClient;
