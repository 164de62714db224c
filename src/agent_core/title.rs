//! Conversation title generation.
//!
//! Runs after a streamed exchange on a conversation that still carries the
//! default title. Failures are logged and leave the default in place.

use std::sync::Arc;

use crate::inference::types::{InputItem, ResponseRequest, Role};
use crate::inference::{LanguageModel, ModelProvider};

use super::conversation::ConversationStore;
use super::errors::AgentError;
use super::types::{Conversation, MessagePayload, UserTurn};

/// Title used when the model returns nothing usable.
pub const FALLBACK_TITLE: &str = "Untitled";

const TITLE_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that generates a title for a conversation.";

const TITLE_INSTRUCTION: &str = "Based on above conversation, generate a short, clear, and \
descriptive title that summarizes the main topic or purpose of the discussion. The title should \
be concise, specific, and use natural language. Avoid vague or generic titles. Use abbreviation \
and short words if possible. Use 3-5 words if possible. Give me the title only, no other text \
including any other words.";

/// Render the user-facing history as one line per turn.
fn transcript(turns: &[UserTurn]) -> String {
    turns
        .iter()
        .filter_map(|turn| match &turn.payload {
            MessagePayload::User { content, .. } => Some(format!("User: {content}")),
            MessagePayload::Assistant { content } => Some(format!("Assistant: {content}")),
            MessagePayload::ToolCall { name, .. } => Some(format!("Tool '{name}' called")),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Trim whitespace and surrounding quotes; empty becomes [`FALLBACK_TITLE`].
fn clean_title(raw: &str) -> String {
    let title = raw.trim().trim_matches('"').trim();
    if title.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        title.to_string()
    }
}

/// Ask `model` for a short title summarising `turns`.
pub async fn generate_title(
    provider: &dyn ModelProvider,
    model: LanguageModel,
    turns: &[UserTurn],
) -> Result<String, AgentError> {
    let prompt = format!("{}\n{TITLE_INSTRUCTION}", transcript(turns));
    let (temperature, max_output_tokens) = model.default_sampling();
    let request = ResponseRequest {
        model: model.name().to_string(),
        input: vec![
            InputItem::message(Role::System, TITLE_SYSTEM_PROMPT),
            InputItem::message(Role::User, prompt),
        ],
        tools: Vec::new(),
        temperature,
        max_output_tokens,
    };

    let output = provider.create_response(request).await?;
    let raw = output
        .iter()
        .filter(|item| item.is_assistant_message())
        .map(|item| item.text())
        .collect::<String>();
    Ok(clean_title(&raw))
}

/// Generate and store a title in the background.
///
/// The handle is returned for callers that want to wait; dropping it leaves
/// the task running.
pub fn spawn_title_update(
    provider: Arc<dyn ModelProvider>,
    store: ConversationStore,
    model: LanguageModel,
    conversation: &Conversation,
) -> tokio::task::JoinHandle<()> {
    let actor_id = conversation.actor_id.clone();
    let conversation_id = conversation.id.clone();
    let turns = conversation.user_history.clone();

    tokio::spawn(async move {
        let title = match generate_title(provider.as_ref(), model, &turns).await {
            Ok(title) => title,
            Err(e) => {
                tracing::error!(conversation_id = %conversation_id, error = %e, "failed to generate conversation title");
                return;
            }
        };
        match store.update_title(&actor_id, &conversation_id, &title) {
            Ok(()) => {
                tracing::info!(conversation_id = %conversation_id, title = %title, "conversation titled")
            }
            Err(e) => {
                tracing::error!(conversation_id = %conversation_id, error = %e, "failed to store conversation title")
            }
        }
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::orchestrator::testing::{text_round, Script, ScriptedProvider};
    use crate::inference::InferenceError;

    fn turns() -> Vec<UserTurn> {
        vec![
            UserTurn::user("score my paper", None),
            UserTurn::tool_call("call_1", "paper_score", "{}", Ok("{}")),
            UserTurn::assistant("msg_1", "Your paper scored 7.5."),
        ]
    }

    #[test]
    fn test_transcript_lines() {
        assert_eq!(
            transcript(&turns()),
            "User: score my paper\nTool 'paper_score' called\nAssistant: Your paper scored 7.5."
        );
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("  \"Paper Score Review\" \n"), "Paper Score Review");
        assert_eq!(clean_title("\"\""), FALLBACK_TITLE);
        assert_eq!(clean_title(""), FALLBACK_TITLE);
    }

    #[tokio::test]
    async fn test_generate_title_uses_non_streaming_request() {
        let provider = ScriptedProvider::new(vec![text_round("msg_t", "\"Scoring A Paper\"")]);
        let title = generate_title(&provider, LanguageModel::Gpt41Mini, &turns())
            .await
            .unwrap();
        assert_eq!(title, "Scoring A Paper");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "gpt-4.1-mini");
        assert!(requests[0].tools.is_empty());
        assert_eq!(
            requests[0].input[0],
            InputItem::message(Role::System, TITLE_SYSTEM_PROMPT)
        );
    }

    #[tokio::test]
    async fn test_generate_title_propagates_transport_errors() {
        let provider = ScriptedProvider::new(vec![Script::Fail(InferenceError::StreamError {
            reason: "down".into(),
        })]);
        let err = generate_title(&provider, LanguageModel::Gpt41Mini, &turns())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Transport(_)));
    }
}
