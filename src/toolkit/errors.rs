//! Toolkit error types.

use thiserror::Error;

/// Errors a tool invocation can produce.
///
/// These are surfaced to the model as `"Error: <message>"` data, never raised
/// out of the orchestration loop.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Dispatch to a name that was never registered.
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    /// The per-(tool, actor, project) rate limit is still in effect.
    #[error("CoolDown: last function call is {status}, please wait for {remaining_secs}s to call this function again")]
    CooldownActive {
        tool: String,
        status: String,
        remaining_secs: u64,
    },

    /// The handler itself failed (bad arguments, upstream rejected the call, panic).
    #[error("{reason}")]
    ExecutionFailed { reason: String },

    /// Network failure talking to a remote tool executor.
    #[error("transport error calling {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    /// Actor, project, or conversation id missing from the tool context.
    #[error("failed to get actor, project id, or conversation id")]
    MissingContext,

    /// Call-record or comment persistence failed.
    #[error("database error: {reason}")]
    Database { reason: String },

    /// Argument or result (de)serialization failed.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

impl ToolError {
    /// Shorthand for a handler-level failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        ToolError::ExecutionFailed {
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for ToolError {
    fn from(e: rusqlite::Error) -> Self {
        ToolError::Database {
            reason: e.to_string(),
        }
    }
}

impl From<r2d2::Error> for ToolError {
    fn from(e: r2d2::Error) -> Self {
        ToolError::Database {
            reason: format!("connection pool: {e}"),
        }
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::Serialization {
            reason: e.to_string(),
        }
    }
}
