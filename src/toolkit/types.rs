//! Shared types for tool handlers.

use async_trait::async_trait;

use super::errors::ToolError;

/// Who is calling and on behalf of which project/conversation.
///
/// Passed explicitly to every handler instead of being read from ambient
/// request state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolContext {
    pub actor_id: String,
    pub project_id: String,
    pub conversation_id: String,
}

impl ToolContext {
    pub fn new(actor_id: &str, project_id: &str, conversation_id: &str) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            project_id: project_id.to_string(),
            conversation_id: conversation_id.to_string(),
        }
    }

    /// Fails with `MissingContext` unless all three ids are present.
    pub fn require_complete(&self) -> Result<(), ToolError> {
        if self.actor_id.is_empty() || self.project_id.is_empty() || self.conversation_id.is_empty()
        {
            return Err(ToolError::MissingContext);
        }
        Ok(())
    }
}

/// What a handler returns on success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Textual result handed back to the model.
    pub result: String,
    /// Optional steering hint for the model's next turn.
    pub further_instruction: Option<String>,
}

impl ToolOutput {
    pub fn text(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            further_instruction: None,
        }
    }

    pub fn with_instruction(result: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            further_instruction: Some(instruction.into()),
        }
    }
}

/// A callable tool. Built-in and catalog-loaded tools implement the same
/// trait and are indistinguishable once registered.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute one call. `args` is the raw JSON argument string produced by
    /// the model.
    async fn call(
        &self,
        ctx: &ToolContext,
        call_id: &str,
        args: &str,
    ) -> Result<ToolOutput, ToolError>;
}
