//! Shared types for the agent core.
//!
//! User-facing turns, conversations, and chat requests used across the
//! stream emitter, the orchestration loop, and the chat session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inference::types::InputItem;
use crate::inference::LanguageModel;

/// Title a conversation carries until one is generated.
pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

/// Prefix for message ids derived from upstream item or call ids.
const MESSAGE_ID_PREFIX: &str = "openai_";

/// Message id shared by every event and turn for one upstream item.
pub fn message_id_for(upstream_id: &str) -> String {
    format!("{MESSAGE_ID_PREFIX}{upstream_id}")
}

// ─── User-facing turns ──────────────────────────────────────────────────────

/// Content of a user-facing turn or a stream part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    User {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selected_text: Option<String>,
    },
    Assistant {
        content: String,
    },
    /// The model is still producing arguments for a tool call.
    ToolCallPrepareArguments {
        name: String,
        #[serde(default)]
        args: String,
    },
    /// A finished (or starting) tool call. On failure `error` is set and
    /// `result` stays empty.
    ToolCall {
        name: String,
        args: String,
        #[serde(default)]
        result: String,
        #[serde(default)]
        error: String,
    },
    Unknown {
        description: String,
    },
}

/// One entry of the user-facing history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTurn {
    pub message_id: String,
    pub payload: MessagePayload,
}

impl UserTurn {
    /// A user message. Ids for user turns are generated locally.
    pub fn user(content: &str, selected_text: Option<&str>) -> Self {
        Self {
            message_id: format!("user_{}", uuid::Uuid::new_v4()),
            payload: MessagePayload::User {
                content: content.to_string(),
                selected_text: selected_text
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            },
        }
    }

    /// Assistant text keyed by the upstream message item id.
    pub fn assistant(item_id: &str, content: &str) -> Self {
        Self {
            message_id: message_id_for(item_id),
            payload: MessagePayload::Assistant {
                content: content.to_string(),
            },
        }
    }

    /// Tool-call outcome keyed by the model-assigned call id.
    pub fn tool_call(call_id: &str, name: &str, args: &str, outcome: Result<&str, &str>) -> Self {
        let (result, error) = match outcome {
            Ok(result) => (result.to_string(), String::new()),
            Err(error) => (String::new(), error.to_string()),
        };
        Self {
            message_id: message_id_for(call_id),
            payload: MessagePayload::ToolCall {
                name: name.to_string(),
                args: args.to_string(),
                result,
                error,
            },
        }
    }
}

// ─── Conversations ──────────────────────────────────────────────────────────

/// A stored conversation with both of its histories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub actor_id: String,
    pub project_id: String,
    pub title: String,
    pub language_model: LanguageModel,
    /// Exact structured history replayed to the model.
    pub model_history: Vec<InputItem>,
    /// History shown to the user; bare tool-call requests are omitted.
    pub user_history: Vec<UserTurn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Fresh conversation with empty histories and the default title.
    pub fn new(actor_id: &str, project_id: &str, language_model: LanguageModel) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            actor_id: actor_id.to_string(),
            project_id: project_id.to_string(),
            title: DEFAULT_CONVERSATION_TITLE.to_string(),
            language_model,
            model_history: Vec::new(),
            user_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_CONVERSATION_TITLE
    }
}

/// What a caller sends to start or continue a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Existing conversation to continue; `None` starts a new one.
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub project_id: String,
    pub user_message: String,
    /// Text the user had selected in the editor, if any.
    #[serde(default)]
    pub selected_text: Option<String>,
    /// Model override; defaults to the conversation's or the configured model.
    #[serde(default)]
    pub language_model: Option<LanguageModel>,
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_call_turn_routes_error_to_error_field() {
        let ok = UserTurn::tool_call("call_1", "paper_score", "{}", Ok("{\"score\":7}"));
        assert_eq!(ok.message_id, "openai_call_1");
        match ok.payload {
            MessagePayload::ToolCall { result, error, .. } => {
                assert_eq!(result, "{\"score\":7}");
                assert!(error.is_empty());
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let failed = UserTurn::tool_call("call_2", "paper_score", "{}", Err("CoolDown: wait"));
        match failed.payload {
            MessagePayload::ToolCall { result, error, .. } => {
                assert!(result.is_empty());
                assert_eq!(error, "CoolDown: wait");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_payload_serializes_with_type_tag() {
        let turn = UserTurn::assistant("msg_1", "Hello");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["message_id"], "openai_msg_1");
        assert_eq!(json["payload"]["type"], "assistant");
        assert_eq!(json["payload"]["content"], "Hello");
    }

    #[test]
    fn test_user_turn_drops_empty_selection() {
        let turn = UserTurn::user("explain", Some(""));
        assert!(turn.message_id.starts_with("user_"));
        assert_eq!(
            turn.payload,
            MessagePayload::User {
                content: "explain".into(),
                selected_text: None
            }
        );
    }

    #[test]
    fn test_new_conversation_has_default_title() {
        let conv = Conversation::new("u1", "p1", LanguageModel::Gpt5);
        assert!(conv.has_default_title());
        assert!(conv.model_history.is_empty());
        assert!(conv.user_history.is_empty());
    }
}
