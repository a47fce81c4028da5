//! Error taxonomy for the session controller, tool dispatcher and config layer.

use std::time::Duration;

use thiserror::Error;

/// Failures that concern the streaming session itself.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    /// Required connection fields are missing or the session config is unusable.
    /// The connection is never attempted.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transport failure while opening, reading or writing the channel.
    #[error("channel error: {0}")]
    Channel(String),

    /// An outbound message was attempted while the session was not connected.
    #[error("channel is closed")]
    ChannelClosed,

    /// Channel establishment did not finish in time.
    #[error("connection timed out after {0:?}")]
    ConnectionTimeout(Duration),
}

/// Failures of a single tool call. These never leave the controller as faults;
/// they are turned into an error payload for the remote peer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToolError {
    #[error("could not parse arguments: {0}")]
    ArgumentParse(String),

    #[error("invalid argument for {tool}: {message}")]
    InvalidArgument { tool: String, message: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

impl ToolError {
    /// Stable machine-readable kind sent back in the result payload.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::ArgumentParse(_) => "argument_parse",
            ToolError::InvalidArgument { .. } => "invalid_argument",
            ToolError::UnknownTool(_) => "unknown_tool",
        }
    }

    pub(crate) fn invalid(tool: &str, message: impl Into<String>) -> Self {
        ToolError::InvalidArgument {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

/// Failures while parsing or validating a session configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
}
