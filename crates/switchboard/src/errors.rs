use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort a turn or fail an adapter call.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider not found: {0}")]
    NotFound(String),

    #[error("No provider registered")]
    NoProvider,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Tool loop exceeded {limit} rounds")]
    ToolLoopExceeded { limit: usize },

    #[error("History store error: {0}")]
    History(String),
}

impl GatewayError {
    /// Short machine-readable name for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Configuration(_) => "configuration",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::NoProvider => "no_provider",
            GatewayError::Protocol(_) => "protocol",
            GatewayError::Upstream { .. } => "upstream",
            GatewayError::UpstreamTimeout(_) => "upstream_timeout",
            GatewayError::Transport(_) => "transport",
            GatewayError::ToolLoopExceeded { .. } => "tool_loop_exceeded",
            GatewayError::History(_) => "history",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::UpstreamTimeout(err.to_string())
        } else if err.is_decode() {
            GatewayError::Protocol(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors raised while executing a tool. These never escape the dispatch
/// binding; they are rendered into a `ToolResult` instead.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("tool execution failed: {0}")]
    Execution(String),
}

pub type ToolOutcome<T> = Result<T, ToolError>;
