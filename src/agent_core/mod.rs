//! Agent Core: conversation engine for the manuscript agent.
//!
//! Submodules:
//! - `orchestrator`: tool-call round loop over a model provider
//! - `stream`: client-facing stream protocol emitter
//! - `conversation`: SQLite conversation store and the chat session boundary
//! - `title`: background conversation title generation
//! - `database`: shared SQLite pool and schema
//! - `types`: user-facing turns, conversations, chat requests
//! - `errors`: agent-level error types

pub mod conversation;
pub mod database;
pub mod errors;
pub mod orchestrator;
pub mod stream;
pub mod title;
pub mod types;

pub use conversation::{ChatSession, ConversationStore};
pub use database::AgentDatabase;
pub use errors::AgentError;
pub use orchestrator::{ChatEngine, ChatOutcome, DEFAULT_MAX_ROUNDS};
pub use stream::{EventSink, StreamEmitter, StreamEvent};
pub use title::generate_title;
pub use types::{ChatRequest, Conversation, MessagePayload, UserTurn};
