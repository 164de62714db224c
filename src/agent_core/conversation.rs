//! Conversation persistence and the chat session boundary.
//!
//! `ConversationStore` keeps both histories of a conversation as JSON in the
//! `conversations` table. `ChatSession` is what callers talk to: it loads or
//! creates the conversation, runs the orchestration rounds, persists the
//! result, and terminates the event stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tokio_util::sync::CancellationToken;

use crate::inference::types::{InputItem, Role};
use crate::inference::LanguageModel;
use crate::toolkit::ToolContext;

use super::database::{from_millis, AgentDatabase};
use super::errors::AgentError;
use super::orchestrator::ChatEngine;
use super::stream::{EventSink, StreamEmitter};
use super::title::spawn_title_update;
use super::types::{ChatRequest, Conversation, UserTurn};

// ─── ConversationStore ──────────────────────────────────────────────────────

/// SQLite-backed conversation storage, scoped by actor.
#[derive(Clone)]
pub struct ConversationStore {
    db: AgentDatabase,
}

const CONVERSATION_COLUMNS: &str = "id, actor_id, project_id, title, language_model, \
     model_history, user_history, created_at, updated_at";

impl ConversationStore {
    pub fn new(db: AgentDatabase) -> Self {
        Self { db }
    }

    pub fn create(&self, conversation: &Conversation) -> Result<(), AgentError> {
        let conn = self.db.get_conn()?;
        conn.execute(
            "INSERT INTO conversations
                (id, actor_id, project_id, title, language_model,
                 model_history, user_history, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                conversation.id,
                conversation.actor_id,
                conversation.project_id,
                conversation.title,
                conversation.language_model.name(),
                serde_json::to_string(&conversation.model_history)?,
                serde_json::to_string(&conversation.user_history)?,
                conversation.created_at.timestamp_millis(),
                conversation.updated_at.timestamp_millis(),
            ],
        )?;
        tracing::debug!(conversation_id = %conversation.id, "conversation created");
        Ok(())
    }

    /// Load a conversation owned by `actor_id`.
    pub fn get(&self, actor_id: &str, conversation_id: &str) -> Result<Conversation, AgentError> {
        let conn = self.db.get_conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations
                      WHERE id = ?1 AND actor_id = ?2"
                ),
                params![conversation_id, actor_id],
                StoredConversation::from_row,
            )
            .optional()?;

        match row {
            Some(stored) => stored.into_conversation(),
            None => Err(AgentError::ConversationNotFound {
                conversation_id: conversation_id.to_string(),
            }),
        }
    }

    /// Conversations for one project, most recently updated first.
    pub fn list(&self, actor_id: &str, project_id: &str) -> Result<Vec<Conversation>, AgentError> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
              WHERE actor_id = ?1 AND project_id = ?2
              ORDER BY updated_at DESC"
        ))?;
        let rows = stmt.query_map(params![actor_id, project_id], StoredConversation::from_row)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?.into_conversation()?);
        }
        Ok(conversations)
    }

    /// Replace both histories and the model. The title is left alone so a
    /// concurrently generated one is not overwritten.
    pub fn update(&self, conversation: &Conversation) -> Result<(), AgentError> {
        let conn = self.db.get_conn()?;
        let changed = conn.execute(
            "UPDATE conversations
                SET language_model = ?3, model_history = ?4, user_history = ?5, updated_at = ?6
              WHERE id = ?1 AND actor_id = ?2",
            params![
                conversation.id,
                conversation.actor_id,
                conversation.language_model.name(),
                serde_json::to_string(&conversation.model_history)?,
                serde_json::to_string(&conversation.user_history)?,
                conversation.updated_at.timestamp_millis(),
            ],
        )?;
        if changed == 0 {
            return Err(AgentError::ConversationNotFound {
                conversation_id: conversation.id.clone(),
            });
        }
        Ok(())
    }

    pub fn update_title(
        &self,
        actor_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<(), AgentError> {
        let conn = self.db.get_conn()?;
        let changed = conn.execute(
            "UPDATE conversations SET title = ?3 WHERE id = ?1 AND actor_id = ?2",
            params![conversation_id, actor_id, title],
        )?;
        if changed == 0 {
            return Err(AgentError::ConversationNotFound {
                conversation_id: conversation_id.to_string(),
            });
        }
        Ok(())
    }
}

/// Raw row before the JSON columns are decoded.
struct StoredConversation {
    id: String,
    actor_id: String,
    project_id: String,
    title: String,
    language_model: String,
    model_history: String,
    user_history: String,
    created_at: i64,
    updated_at: i64,
}

impl StoredConversation {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            actor_id: row.get(1)?,
            project_id: row.get(2)?,
            title: row.get(3)?,
            language_model: row.get(4)?,
            model_history: row.get(5)?,
            user_history: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_conversation(self) -> Result<Conversation, AgentError> {
        Ok(Conversation {
            model_history: serde_json::from_str(&self.model_history)?,
            user_history: serde_json::from_str(&self.user_history)?,
            language_model: LanguageModel::from_name(&self.language_model),
            id: self.id,
            actor_id: self.actor_id,
            project_id: self.project_id,
            title: self.title,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        })
    }
}

// ─── ChatSession ────────────────────────────────────────────────────────────

/// Render the model-facing text of a user message.
fn user_prompt(message: &str, selected_text: Option<&str>) -> String {
    match selected_text.map(str::trim).filter(|s| !s.is_empty()) {
        Some(selected) => format!("{}\n\nSelected text:\n{selected}", message.trim()),
        None => message.trim().to_string(),
    }
}

/// The conversation-facing boundary over the engine and the store.
#[derive(Clone)]
pub struct ChatSession {
    engine: ChatEngine,
    store: ConversationStore,
    default_model: LanguageModel,
    title_model: LanguageModel,
    system_prompt: Option<String>,
    locks: Arc<LockMap>,
}

impl ChatSession {
    pub fn new(
        engine: ChatEngine,
        store: ConversationStore,
        default_model: LanguageModel,
        title_model: LanguageModel,
    ) -> Self {
        Self {
            engine,
            store,
            default_model,
            title_model,
            system_prompt: None,
            locks: Arc::default(),
        }
    }

    /// System message placed at the head of every new conversation.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = (!prompt.trim().is_empty()).then_some(prompt);
        self
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Take a share of the per-conversation lock. The map entry is removed
    /// when the last share is dropped.
    fn conversation_lock(&self, conversation_id: &str) -> LockLease<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let lock = locks
            .entry(conversation_id.to_string())
            .or_default()
            .clone();
        LockLease {
            locks: &*self.locks,
            conversation_id: conversation_id.to_string(),
            lock,
        }
    }

    /// Load the requested conversation or create a new one under `conversation_id`.
    fn open_conversation(
        &self,
        actor_id: &str,
        conversation_id: &str,
        request: &ChatRequest,
    ) -> Result<Conversation, AgentError> {
        if requested_conversation(request).is_some() {
            let mut conversation = self.store.get(actor_id, conversation_id)?;
            if let Some(model) = request.language_model {
                conversation.language_model = model;
            }
            return Ok(conversation);
        }

        let model = request.language_model.unwrap_or(self.default_model);
        let mut conversation = Conversation::new(actor_id, &request.project_id, model);
        conversation.id = conversation_id.to_string();
        if let Some(prompt) = &self.system_prompt {
            conversation
                .model_history
                .push(InputItem::message(Role::System, prompt.clone()));
        }
        self.store.create(&conversation)?;
        tracing::info!(conversation_id = %conversation.id, model = model.name(), "conversation started");
        Ok(conversation)
    }

    /// Send one user message and run the agent until it stops calling tools.
    ///
    /// Events go to `sink` when one is attached. The stream is always
    /// terminated: finalization on success or cancellation, a stream error
    /// when loading, the rounds, or persistence fail. Messages for the same
    /// conversation are processed one at a time.
    pub async fn send_message(
        &self,
        actor_id: &str,
        request: ChatRequest,
        sink: Option<Arc<dyn EventSink>>,
        cancel: &CancellationToken,
    ) -> Result<Conversation, AgentError> {
        let conversation_id = match requested_conversation(&request) {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let model = request.language_model.unwrap_or(self.default_model);
        let emitter = match sink {
            Some(sink) => StreamEmitter::new(sink, &conversation_id, model),
            None => StreamEmitter::detached(&conversation_id, model),
        };

        let lease = self.conversation_lock(&conversation_id);
        let _serialised = lease.lock.lock().await;

        let conversation = match self.open_conversation(actor_id, &conversation_id, &request) {
            Ok(conversation) => conversation,
            Err(e) => {
                emitter.send_stream_error(&e.to_string());
                tracing::warn!(conversation_id = %conversation_id, error = %e, "failed to open conversation");
                return Err(e);
            }
        };
        let emitter = emitter.with_language_model(conversation.language_model);
        self.exchange(conversation, &request, &emitter, cancel).await
    }

    async fn exchange(
        &self,
        mut conversation: Conversation,
        request: &ChatRequest,
        emitter: &StreamEmitter,
        cancel: &CancellationToken,
    ) -> Result<Conversation, AgentError> {
        emitter.send_initialization();
        let _finalize = emitter.finalize_on_drop();

        let selected_text = request.selected_text.as_deref();
        conversation.model_history.push(InputItem::message(
            Role::User,
            user_prompt(&request.user_message, selected_text),
        ));
        conversation
            .user_history
            .push(UserTurn::user(&request.user_message, selected_text));

        let model = conversation.language_model;
        let ctx = ToolContext::new(
            &conversation.actor_id,
            &conversation.project_id,
            &conversation.id,
        );
        let history = conversation.model_history.clone();
        let outcome = match self
            .engine
            .run_rounds(&ctx, model, history, emitter, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                if !matches!(e, AgentError::Cancelled) {
                    emitter.send_stream_error(&e.to_string());
                }
                tracing::warn!(conversation_id = %conversation.id, error = %e, "chat request ended early");
                return Err(e);
            }
        };

        conversation.model_history = outcome.model_history;
        conversation.user_history.extend(outcome.user_delta);
        conversation.updated_at = Utc::now();
        if let Err(e) = self.store.update(&conversation) {
            emitter.send_stream_error(&format!("failed to save conversation: {e}"));
            return Err(e);
        }

        tracing::info!(
            conversation_id = %conversation.id,
            rounds = outcome.rounds,
            model_history_len = conversation.model_history.len(),
            user_history_len = conversation.user_history.len(),
            "conversation updated"
        );

        if conversation.has_default_title() {
            spawn_title_update(
                self.engine.provider().clone(),
                self.store.clone(),
                self.title_model,
                &conversation,
            );
        }

        Ok(conversation)
    }
}

fn requested_conversation(request: &ChatRequest) -> Option<&str> {
    request.conversation_id.as_deref().filter(|id| !id.is_empty())
}

type LockMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// A request's share of a conversation lock.
struct LockLease<'a> {
    locks: &'a LockMap,
    conversation_id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // The map's copy and this one: nobody else holds or waits on it.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.conversation_id);
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::orchestrator::testing::{text_round, tool_round, Script, ScriptedProvider};
    use crate::agent_core::stream::testing::RecordingSink;
    use crate::agent_core::stream::StreamEvent;
    use crate::agent_core::types::{MessagePayload, DEFAULT_CONVERSATION_TITLE};
    use crate::inference::types::ToolDescriptor;
    use crate::inference::InferenceError;
    use crate::toolkit::{ToolCallHandler, ToolError, ToolHandler, ToolOutput, ToolRegistry};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, _: &ToolContext, _: &str, args: &str) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(format!("echo {args}")))
        }
    }

    fn session(scripts: Vec<Script>) -> (Arc<ScriptedProvider>, ChatSession) {
        let provider = Arc::new(ScriptedProvider::new(scripts));
        let mut registry = ToolRegistry::new();
        registry.register(
            "echo",
            ToolDescriptor::without_parameters("echo", "echoes"),
            Arc::new(Echo),
        );
        let engine = ChatEngine::new(
            provider.clone(),
            ToolCallHandler::new(Arc::new(registry)),
        );
        let store = ConversationStore::new(AgentDatabase::open_in_memory().unwrap());
        let session = ChatSession::new(engine, store, LanguageModel::Gpt5, LanguageModel::Gpt41Mini);
        (provider, session)
    }

    fn request(conversation_id: Option<&str>, message: &str) -> ChatRequest {
        ChatRequest {
            conversation_id: conversation_id.map(str::to_string),
            project_id: "p1".into(),
            user_message: message.into(),
            ..ChatRequest::default()
        }
    }

    async fn wait_for_title(store: &ConversationStore, id: &str) -> String {
        for _ in 0..50 {
            let conversation = store.get("alice", id).unwrap();
            if !conversation.has_default_title() {
                return conversation.title;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("title was never generated");
    }

    #[test]
    fn test_store_round_trip_and_scoping() {
        let store = ConversationStore::new(AgentDatabase::open_in_memory().unwrap());
        let mut conversation = Conversation::new("alice", "p1", LanguageModel::Gpt41);
        conversation.user_history.push(UserTurn::user("hi", Some("abstract")));
        conversation.model_history.push(InputItem::message(Role::User, "hi"));
        store.create(&conversation).unwrap();

        assert_eq!(store.get("alice", &conversation.id).unwrap().user_history, conversation.user_history);
        assert!(matches!(
            store.get("bob", &conversation.id),
            Err(AgentError::ConversationNotFound { .. })
        ));
        assert!(matches!(
            store.update_title("bob", &conversation.id, "x"),
            Err(AgentError::ConversationNotFound { .. })
        ));

        store.update_title("alice", &conversation.id, "Greeting").unwrap();
        let listed = store.list("alice", "p1").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Greeting");
        assert_eq!(listed[0].language_model, LanguageModel::Gpt41);
    }

    #[test]
    fn test_user_prompt_appends_selection() {
        assert_eq!(user_prompt(" fix this ", None), "fix this");
        assert_eq!(user_prompt("fix this", Some("  ")), "fix this");
        assert_eq!(
            user_prompt("fix this", Some("We propose")),
            "fix this\n\nSelected text:\nWe propose"
        );
    }

    #[tokio::test]
    async fn test_new_conversation_is_persisted_and_titled() {
        let (provider, session) = session(vec![
            tool_round(&[("call_1", "echo", "{}")]),
            text_round("msg_1", "Done."),
            text_round("msg_t", "\"Echo Test\""),
        ]);
        let sink = Arc::new(RecordingSink::default());

        let conversation = session
            .send_message("alice", request(None, "run echo"), Some(sink.clone()), &CancellationToken::new())
            .await
            .unwrap();

        sink.assert_well_formed();
        assert!(matches!(sink.events().last(), Some(StreamEvent::Finalization { .. })));

        // user, call, output, assistant
        assert_eq!(conversation.model_history.len(), 4);
        assert_eq!(conversation.user_history.len(), 3);
        assert!(matches!(conversation.user_history[0].payload, MessagePayload::User { .. }));

        let stored = session.store().get("alice", &conversation.id).unwrap();
        assert_eq!(stored.model_history, conversation.model_history);
        assert_eq!(stored.title, DEFAULT_CONVERSATION_TITLE);

        assert_eq!(wait_for_title(session.store(), &conversation.id).await, "Echo Test");
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_follow_up_replays_previous_exchange() {
        let (provider, session) = session(vec![
            text_round("msg_1", "Hello."),
            text_round("msg_t", "Greeting"),
            text_round("msg_2", "Still here."),
        ]);
        let cancel = CancellationToken::new();
        let first = session
            .send_message("alice", request(None, "hi"), None, &cancel)
            .await
            .unwrap();
        wait_for_title(session.store(), &first.id).await;

        let second = session
            .send_message("alice", request(Some(&first.id), "again"), None, &cancel)
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.model_history.len(), 4);
        assert_eq!(second.user_history.len(), 4);
        // Titled conversations are not retitled.
        assert_eq!(provider.requests().len(), 3);
        assert_eq!(provider.requests()[2].input.len(), 3);
    }

    #[tokio::test]
    async fn test_system_prompt_heads_new_conversations() {
        let (provider, session) = session(vec![text_round("msg_1", "ok"), text_round("t", "T")]);
        let session = session.with_system_prompt("You review papers.");
        session
            .send_message("alice", request(None, "hi"), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            provider.requests()[0].input[0],
            InputItem::message(Role::System, "You review papers.")
        );
    }

    #[tokio::test]
    async fn test_unknown_conversation_streams_error() {
        let (provider, session) = session(vec![]);
        let sink = Arc::new(RecordingSink::default());

        let err = session
            .send_message("alice", request(Some("missing"), "hi"), Some(sink.clone()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ConversationNotFound { .. }));

        sink.assert_well_formed();
        let events = sink.events();
        assert!(matches!(
            &events[0],
            StreamEvent::Initialization { conversation_id, .. } if conversation_id == "missing"
        ));
        match events.last() {
            Some(StreamEvent::StreamError { error_message }) => {
                assert!(error_message.contains("missing"))
            }
            other => panic!("expected stream error, got {other:?}"),
        }
        assert!(provider.requests().is_empty());
        assert!(session.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conversation_locks_are_released() {
        let (_, session) = session(vec![
            text_round("msg_1", "Hello."),
            text_round("msg_t", "Greeting"),
        ]);
        let conversation = session
            .send_message("alice", request(None, "hi"), None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(session.locks.lock().unwrap().is_empty());

        let held = session.conversation_lock(&conversation.id);
        let waiting = session.conversation_lock(&conversation.id);
        drop(held);
        assert_eq!(session.locks.lock().unwrap().len(), 1);
        drop(waiting);
        assert!(session.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_conversation_keeps_announced_id() {
        let (_, session) = session(vec![text_round("msg_1", "ok"), text_round("t", "T")]);
        let sink = Arc::new(RecordingSink::default());
        let conversation = session
            .send_message("alice", request(None, "hi"), Some(sink.clone()), &CancellationToken::new())
            .await
            .unwrap();
        match &sink.events()[0] {
            StreamEvent::Initialization { conversation_id, language_model } => {
                assert_eq!(conversation_id, &conversation.id);
                assert_eq!(*language_model, LanguageModel::Gpt5);
            }
            other => panic!("unexpected first event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_streams_error_and_keeps_history() {
        let (_, session) = session(vec![Script::Fail(InferenceError::StreamError {
            reason: "connection reset".into(),
        })]);
        let sink = Arc::new(RecordingSink::default());

        let err = session
            .send_message("alice", request(None, "hi"), Some(sink.clone()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Transport(_)));

        sink.assert_well_formed();
        let events = sink.events();
        let conversation_id = match &events[0] {
            StreamEvent::Initialization { conversation_id, .. } => conversation_id.clone(),
            other => panic!("unexpected first event {other:?}"),
        };
        assert!(matches!(events.last(), Some(StreamEvent::StreamError { .. })));

        let stored = session.store().get("alice", &conversation_id).unwrap();
        assert!(stored.model_history.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_finalizes_stream() {
        let (_, session) = session(vec![Script::Hang]);
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = session
            .send_message("alice", request(None, "hi"), Some(sink.clone()), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        sink.assert_well_formed();
        assert!(matches!(sink.events().last(), Some(StreamEvent::Finalization { .. })));
    }
}
