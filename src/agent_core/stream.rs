//! Stream protocol emitter.
//!
//! Turns upstream response events and tool-call progress into the ordered
//! `StreamEvent` sequence a live client consumes. Every event for one logical
//! unit (assistant message, argument preparation, tool call) carries the same
//! message id, derived from the upstream item or call id.
//!
//! The emitter tracks open parts so the sequence always satisfies:
//! one initialization first, one terminal event (finalization xor
//! stream-error) last, chunks only inside an open assistant part, and no
//! part left open at the terminal event.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::inference::types::{FunctionCall, OutputItem};
use crate::inference::LanguageModel;

use super::types::{message_id_for, MessagePayload};

// ─── Events ─────────────────────────────────────────────────────────────────

/// One event of the client-facing stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Initialization {
        conversation_id: String,
        language_model: LanguageModel,
    },
    PartBegin {
        message_id: String,
        payload: MessagePayload,
    },
    MessageChunk {
        message_id: String,
        delta: String,
    },
    PartEnd {
        message_id: String,
        payload: MessagePayload,
    },
    IncompleteIndicator {
        reason: String,
        response_id: String,
    },
    Finalization {
        conversation_id: String,
    },
    StreamError {
        error_message: String,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Finalization { .. } | StreamEvent::StreamError { .. }
        )
    }
}

/// Write-only transport for stream events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: StreamEvent);
}

impl EventSink for mpsc::UnboundedSender<StreamEvent> {
    fn emit(&self, event: StreamEvent) {
        if self.send(event).is_err() {
            tracing::debug!("stream receiver dropped, event discarded");
        }
    }
}

// ─── Emitter ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartKind {
    Assistant,
    ToolCallPrepare,
    ToolCall,
    Unknown,
}

struct OpenPart {
    message_id: String,
    kind: PartKind,
}

#[derive(Default)]
struct EmitterState {
    initialized: bool,
    terminated: bool,
    open_parts: Vec<OpenPart>,
}

/// Emits protocol events for one conversation request.
///
/// With no sink attached every method is a no-op, so the same orchestration
/// path serves streaming and fire-and-forget callers. Methods take `&self`
/// and serialize through an internal lock, so concurrently dispatched tool
/// calls can report progress through a shared emitter.
pub struct StreamEmitter {
    sink: Option<Arc<dyn EventSink>>,
    conversation_id: String,
    language_model: LanguageModel,
    state: Mutex<EmitterState>,
}

impl StreamEmitter {
    pub fn new(
        sink: Arc<dyn EventSink>,
        conversation_id: &str,
        language_model: LanguageModel,
    ) -> Self {
        Self {
            sink: Some(sink),
            conversation_id: conversation_id.to_string(),
            language_model,
            state: Mutex::new(EmitterState::default()),
        }
    }

    /// Emitter without a transport. Every emit is a no-op.
    pub fn detached(conversation_id: &str, language_model: LanguageModel) -> Self {
        Self {
            sink: None,
            conversation_id: conversation_id.to_string(),
            language_model,
            state: Mutex::new(EmitterState::default()),
        }
    }

    /// Model announced in the initialization event.
    pub fn with_language_model(mut self, language_model: LanguageModel) -> Self {
        self.language_model = language_model;
        self
    }

    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Whether finalization or a stream error has been sent.
    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }

    fn lock(&self) -> MutexGuard<'_, EmitterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: StreamEvent) {
        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Announce the stream. Sent at most once.
    pub fn send_initialization(&self) {
        let mut state = self.lock();
        self.initialize_locked(&mut state);
    }

    fn initialize_locked(&self, state: &mut EmitterState) {
        if state.initialized || state.terminated {
            return;
        }
        state.initialized = true;
        self.emit(StreamEvent::Initialization {
            conversation_id: self.conversation_id.clone(),
            language_model: self.language_model,
        });
    }

    /// Terminate the stream cleanly. Idempotent; no-op after a stream error.
    pub fn send_finalization(&self) {
        self.terminate(StreamEvent::Finalization {
            conversation_id: self.conversation_id.clone(),
        });
    }

    /// Terminate the stream with an error. No-op if already terminated.
    pub fn send_stream_error(&self, error_message: &str) {
        self.terminate(StreamEvent::StreamError {
            error_message: error_message.to_string(),
        });
    }

    fn terminate(&self, event: StreamEvent) {
        let mut state = self.lock();
        if state.terminated {
            return;
        }
        self.initialize_locked(&mut state);

        // Close dangling parts, innermost first.
        while let Some(part) = state.open_parts.pop() {
            tracing::debug!(message_id = %part.message_id, "closing interrupted stream part");
            self.emit(StreamEvent::PartEnd {
                message_id: part.message_id,
                payload: MessagePayload::Unknown {
                    description: "interrupted".into(),
                },
            });
        }

        state.terminated = true;
        self.emit(event);
    }

    /// Guard that sends finalization when dropped, unless the stream has
    /// already terminated.
    pub fn finalize_on_drop(&self) -> FinalizationGuard<'_> {
        FinalizationGuard { emitter: self }
    }

    // ─── Parts ──────────────────────────────────────────────────────────

    fn begin_part(&self, message_id: String, kind: PartKind, payload: MessagePayload) {
        let mut state = self.lock();
        if state.terminated {
            return;
        }
        self.initialize_locked(&mut state);
        if state.open_parts.iter().any(|p| p.message_id == message_id) {
            tracing::debug!(message_id = %message_id, "part already open, begin ignored");
            return;
        }
        state.open_parts.push(OpenPart {
            message_id: message_id.clone(),
            kind,
        });
        self.emit(StreamEvent::PartBegin {
            message_id,
            payload,
        });
    }

    fn end_part(&self, message_id: String, payload: MessagePayload) {
        let mut state = self.lock();
        if state.terminated {
            return;
        }
        let Some(index) = state
            .open_parts
            .iter()
            .position(|p| p.message_id == message_id)
        else {
            tracing::debug!(message_id = %message_id, "no open part, end ignored");
            return;
        };
        state.open_parts.remove(index);
        self.emit(StreamEvent::PartEnd {
            message_id,
            payload,
        });
    }

    /// An output item started: messages open an assistant part, function
    /// calls open an argument-preparation part, anything else an unknown part.
    pub fn handle_item_added(&self, item: &OutputItem) {
        let message_id = message_id_for(&item.id);
        if item.is_message() {
            self.begin_part(
                message_id,
                PartKind::Assistant,
                MessagePayload::Assistant {
                    content: String::new(),
                },
            );
        } else if item.is_function_call() {
            self.begin_part(
                message_id,
                PartKind::ToolCallPrepare,
                MessagePayload::ToolCallPrepareArguments {
                    name: item.name.clone().unwrap_or_default(),
                    args: String::new(),
                },
            );
        } else {
            self.begin_part(message_id, PartKind::Unknown, unknown_payload(item));
        }
    }

    /// An output item finished: closes its part with the final text or
    /// arguments.
    pub fn handle_item_done(&self, item: &OutputItem) {
        let message_id = message_id_for(&item.id);
        let payload = if item.is_message() {
            MessagePayload::Assistant {
                content: item.text(),
            }
        } else if item.is_function_call() {
            MessagePayload::ToolCallPrepareArguments {
                name: item.name.clone().unwrap_or_default(),
                args: item.arguments.clone().unwrap_or_default(),
            }
        } else {
            unknown_payload(item)
        };
        self.end_part(message_id, payload);
    }

    /// Text delta for the currently open assistant part with this item id.
    pub fn handle_text_delta(&self, item_id: &str, delta: &str) {
        let message_id = message_id_for(item_id);
        let state = self.lock();
        if state.terminated {
            return;
        }
        let open_assistant = state
            .open_parts
            .iter()
            .any(|p| p.message_id == message_id && p.kind == PartKind::Assistant);
        if !open_assistant {
            tracing::debug!(message_id = %message_id, "delta outside an open assistant part dropped");
            return;
        }
        self.emit(StreamEvent::MessageChunk {
            message_id,
            delta: delta.to_string(),
        });
    }

    /// The model stopped before completing its response.
    pub fn send_incomplete_indicator(&self, reason: &str, response_id: &str) {
        let mut state = self.lock();
        if state.terminated {
            return;
        }
        self.initialize_locked(&mut state);
        self.emit(StreamEvent::IncompleteIndicator {
            reason: reason.to_string(),
            response_id: response_id.to_string(),
        });
    }

    /// A tool invocation is about to start.
    pub fn send_tool_call_begin(&self, call: &FunctionCall) {
        self.begin_part(
            message_id_for(&call.call_id),
            PartKind::ToolCall,
            MessagePayload::ToolCall {
                name: call.name.clone(),
                args: call.arguments.clone(),
                result: String::new(),
                error: String::new(),
            },
        );
    }

    /// A tool invocation finished, successfully or not.
    pub fn send_tool_call_end(&self, call: &FunctionCall, outcome: Result<&str, &str>) {
        let (result, error) = match outcome {
            Ok(result) => (result.to_string(), String::new()),
            Err(error) => (String::new(), error.to_string()),
        };
        self.end_part(
            message_id_for(&call.call_id),
            MessagePayload::ToolCall {
                name: call.name.clone(),
                args: call.arguments.clone(),
                result,
                error,
            },
        );
    }
}

fn unknown_payload(item: &OutputItem) -> MessagePayload {
    MessagePayload::Unknown {
        description: format!("Unknown message type: {}", item.kind),
    }
}

/// Sends finalization on drop. See [`StreamEmitter::finalize_on_drop`].
pub struct FinalizationGuard<'a> {
    emitter: &'a StreamEmitter,
}

impl Drop for FinalizationGuard<'_> {
    fn drop(&mut self) {
        self.emitter.send_finalization();
    }
}

// ─── Test support ───────────────────────────────────────────────────────────

/// Sink that records events and checks the protocol invariants.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<StreamEvent>>,
    }

    impl RecordingSink {
        pub fn events(&self) -> Vec<StreamEvent> {
            self.events.lock().unwrap().clone()
        }

        /// Panics unless the recorded sequence is a well-formed stream.
        pub fn assert_well_formed(&self) {
            let events = self.events();
            assert!(
                matches!(events.first(), Some(StreamEvent::Initialization { .. })),
                "stream must start with initialization: {events:?}"
            );
            let inits = events
                .iter()
                .filter(|e| matches!(e, StreamEvent::Initialization { .. }))
                .count();
            assert_eq!(inits, 1, "exactly one initialization");
            let terminals = events.iter().filter(|e| e.is_terminal()).count();
            assert_eq!(terminals, 1, "exactly one terminal event: {events:?}");
            assert!(events.last().map(StreamEvent::is_terminal).unwrap_or(false));

            let mut open: Vec<(String, bool)> = Vec::new();
            for event in &events {
                match event {
                    StreamEvent::PartBegin {
                        message_id,
                        payload,
                    } => {
                        assert!(
                            !open.iter().any(|(id, _)| id == message_id),
                            "part {message_id} opened twice"
                        );
                        let is_assistant = matches!(payload, MessagePayload::Assistant { .. });
                        open.push((message_id.clone(), is_assistant));
                    }
                    StreamEvent::PartEnd { message_id, .. } => {
                        let idx = open
                            .iter()
                            .position(|(id, _)| id == message_id)
                            .unwrap_or_else(|| panic!("end without begin for {message_id}"));
                        open.remove(idx);
                    }
                    StreamEvent::MessageChunk { message_id, .. } => {
                        assert!(
                            open.iter().any(|(id, a)| id == message_id && *a),
                            "chunk outside open assistant part {message_id}"
                        );
                    }
                    e if e.is_terminal() => {
                        assert!(open.is_empty(), "dangling parts at terminal: {open:?}");
                    }
                    _ => {}
                }
            }
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: StreamEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
