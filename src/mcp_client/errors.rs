//! MCP Client error types.

use thiserror::Error;

use crate::toolkit::ToolError;

/// Errors that can occur talking to the remote tool catalog.
#[derive(Debug, Error)]
pub enum McpError {
    /// The initialization handshake failed.
    #[error("catalog initialization failed: {reason}")]
    InitFailed { reason: String },

    /// HTTP failure or an unreadable body.
    #[error("transport error for '{endpoint}': {reason}")]
    TransportError { endpoint: String, reason: String },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The reply was not the JSON-RPC shape we expected.
    #[error("protocol error: {reason}")]
    ProtocolError { reason: String },
}

impl From<McpError> for ToolError {
    fn from(e: McpError) -> Self {
        match e {
            McpError::TransportError { endpoint, reason } => ToolError::Transport { endpoint, reason },
            other => ToolError::failed(other.to_string()),
        }
    }
}
