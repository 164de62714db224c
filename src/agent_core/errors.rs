//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;

/// Errors that abort a chat round and are surfaced to the caller.
///
/// Tool-level failures never appear here: they are recorded in history as
/// data so the model can react to them.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Talking to the model provider failed.
    #[error("model transport error: {0}")]
    Transport(#[from] InferenceError),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// Database operation failed.
    #[error("database error: {reason}")]
    DatabaseError { reason: String },

    /// Conversation not found for this actor.
    #[error("conversation not found: '{conversation_id}'")]
    ConversationNotFound { conversation_id: String },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::DatabaseError {
            reason: e.to_string(),
        }
    }
}

impl From<r2d2::Error> for AgentError {
    fn from(e: r2d2::Error) -> Self {
        AgentError::DatabaseError {
            reason: format!("connection pool: {e}"),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::SerializationError {
            reason: e.to_string(),
        }
    }
}
