//! Orchestration loop: drives the model through tool-call rounds.
//!
//! Each round replays the model-facing history, forwards the streamed
//! response to the emitter, records assistant messages, and dispatches any
//! tool calls. A round without tool calls ends the loop. Every exit path
//! terminates the event stream exactly once.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::inference::streaming::failed_response_error;
use crate::inference::types::{InputItem, OutputItem, ResponseEvent, ResponseRequest, Role};
use crate::inference::{InferenceError, LanguageModel, ModelProvider};
use crate::toolkit::{ToolCallHandler, ToolContext};

use super::errors::AgentError;
use super::stream::StreamEmitter;
use super::types::UserTurn;

/// Default cap on model round trips per request.
pub const DEFAULT_MAX_ROUNDS: usize = 20;

/// Result of a completed request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOutcome {
    /// Full model-facing history, including what was passed in.
    pub model_history: Vec<InputItem>,
    /// User-facing turns appended during this request only.
    pub user_delta: Vec<UserTurn>,
    /// Model round trips performed.
    pub rounds: usize,
}

/// Conversation engine: a model provider plus the tools it may call.
///
/// Constructed once at startup and shared by every conversation.
#[derive(Clone)]
pub struct ChatEngine {
    provider: Arc<dyn ModelProvider>,
    handler: ToolCallHandler,
    max_rounds: usize,
}

impl ChatEngine {
    pub fn new(provider: Arc<dyn ModelProvider>, handler: ToolCallHandler) -> Self {
        Self {
            provider,
            handler,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    /// Run a request, streaming every phase through `emitter`.
    ///
    /// The stream is always terminated: finalization on success or
    /// cancellation, a stream error on any other failure.
    pub async fn chat_completion_stream(
        &self,
        ctx: &ToolContext,
        model: LanguageModel,
        history: Vec<InputItem>,
        emitter: &StreamEmitter,
        cancel: &CancellationToken,
    ) -> Result<ChatOutcome, AgentError> {
        emitter.send_initialization();
        let _finalize = emitter.finalize_on_drop();

        let outcome = self.run_rounds(ctx, model, history, emitter, cancel).await;
        if let Err(e) = &outcome {
            if !matches!(e, AgentError::Cancelled) {
                emitter.send_stream_error(&e.to_string());
            }
        }
        outcome
    }

    /// Run a request without a live client.
    pub async fn chat_completion(
        &self,
        ctx: &ToolContext,
        model: LanguageModel,
        history: Vec<InputItem>,
        cancel: &CancellationToken,
    ) -> Result<ChatOutcome, AgentError> {
        let emitter = StreamEmitter::detached(&ctx.conversation_id, model);
        self.run_rounds(ctx, model, history, &emitter, cancel).await
    }

    /// The round loop. Leaves stream termination to the caller.
    pub(crate) async fn run_rounds(
        &self,
        ctx: &ToolContext,
        model: LanguageModel,
        mut history: Vec<InputItem>,
        emitter: &StreamEmitter,
        cancel: &CancellationToken,
    ) -> Result<ChatOutcome, AgentError> {
        let tools = self.handler.registry().descriptors();
        let (temperature, max_output_tokens) = model.default_sampling();
        let mut user_delta = Vec::new();
        let mut rounds = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            rounds += 1;

            tracing::info!(
                conversation_id = %ctx.conversation_id,
                round = rounds,
                history_len = history.len(),
                model = model.name(),
                "=== ROUND START ==="
            );

            let request = ResponseRequest {
                model: model.name().to_string(),
                input: history.clone(),
                tools: tools.clone(),
                temperature,
                max_output_tokens,
            };

            let output = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(round = rounds, "request cancelled during model stream");
                    return Err(AgentError::Cancelled);
                }
                output = self.stream_round(request, emitter) => output?,
            };

            tracing::info!(
                conversation_id = %ctx.conversation_id,
                round = rounds,
                items = output.len(),
                tool_calls = output.iter().filter(|i| i.is_function_call()).count(),
                "=== MODEL RESPONSE ==="
            );

            for item in output.iter().filter(|i| i.is_assistant_message()) {
                let text = item.text();
                history.push(InputItem::message(Role::Assistant, text.clone()));
                user_delta.push(UserTurn::assistant(&item.id, &text));
            }

            let tool_round = self.handler.handle_tool_calls(ctx, &output, emitter).await;
            if tool_round.is_empty() {
                break;
            }
            history.extend(tool_round.model_items);
            user_delta.extend(tool_round.user_turns);

            if rounds >= self.max_rounds {
                tracing::warn!(
                    conversation_id = %ctx.conversation_id,
                    max_rounds = self.max_rounds,
                    "round cap reached, ending loop with tool results unanswered"
                );
                break;
            }
        }

        Ok(ChatOutcome {
            model_history: history,
            user_delta,
            rounds,
        })
    }

    /// One streamed model response. Returns the final output items.
    async fn stream_round(
        &self,
        request: ResponseRequest,
        emitter: &StreamEmitter,
    ) -> Result<Vec<OutputItem>, AgentError> {
        let mut events = self.provider.stream_response(request).await?;
        let mut output = None;

        while let Some(event) = events.next().await {
            match event? {
                ResponseEvent::OutputItemAdded { item } => emitter.handle_item_added(&item),
                ResponseEvent::OutputItemDone { item } => emitter.handle_item_done(&item),
                ResponseEvent::OutputTextDelta { item_id, delta } => {
                    emitter.handle_text_delta(&item_id, &delta)
                }
                ResponseEvent::Incomplete { response } => {
                    let reason = response
                        .incomplete_details
                        .as_ref()
                        .map(|d| d.reason.as_str())
                        .unwrap_or("unknown");
                    tracing::warn!(response_id = %response.id, reason, "model response incomplete");
                    emitter.send_incomplete_indicator(reason, &response.id);
                    output = Some(response.output);
                }
                ResponseEvent::Completed { response } => output = Some(response.output),
                ResponseEvent::Failed { response } => {
                    return Err(failed_response_error(&response).into())
                }
                ResponseEvent::Error { code, message } => {
                    return Err(InferenceError::ResponseFailed { code, message }.into())
                }
                ResponseEvent::Other => {}
            }
        }

        output.ok_or_else(|| {
            InferenceError::StreamError {
                reason: "stream ended before the response completed".into(),
            }
            .into()
        })
    }
}

// ─── Test support ───────────────────────────────────────────────────────────

/// Provider that replays scripted event sequences, one per request.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::inference::types::ResponseSnapshot;
    use crate::inference::ResponseEventStream;

    use super::*;

    pub enum Script {
        Events(Vec<Result<ResponseEvent, InferenceError>>),
        /// A stream that never yields.
        Hang,
        /// The request itself fails.
        Fail(InferenceError),
    }

    #[derive(Default)]
    pub struct ScriptedProvider {
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<ResponseRequest>>,
    }

    impl ScriptedProvider {
        pub fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                requests: Mutex::default(),
            }
        }

        pub fn requests(&self) -> Vec<ResponseRequest> {
            self.requests.lock().unwrap().clone()
        }

        fn next(&self, request: ResponseRequest) -> Script {
            self.requests.lock().unwrap().push(request);
            self.scripts
                .lock()
                .unwrap()
                .pop_front()
                .expect("provider called more often than scripted")
        }
    }

    fn snapshot(id: &str, output: Vec<OutputItem>) -> ResponseSnapshot {
        serde_json::from_value(serde_json::json!({ "id": id, "output": output })).unwrap()
    }

    /// Streamed text answer.
    pub fn text_round(item_id: &str, text: &str) -> Script {
        let item = OutputItem::assistant_message(item_id, text);
        let added = OutputItem::assistant_message(item_id, "");
        Script::Events(vec![
            Ok(ResponseEvent::OutputItemAdded { item: added }),
            Ok(ResponseEvent::OutputTextDelta {
                item_id: item_id.into(),
                delta: text.into(),
            }),
            Ok(ResponseEvent::OutputItemDone { item: item.clone() }),
            Ok(ResponseEvent::Completed {
                response: snapshot("resp_text", vec![item]),
            }),
        ])
    }

    /// Streamed round consisting of tool calls `(call_id, name, args)`.
    pub fn tool_round(calls: &[(&str, &str, &str)]) -> Script {
        let items: Vec<OutputItem> = calls
            .iter()
            .map(|(call_id, name, args)| {
                OutputItem::function_call(&format!("fc_{call_id}"), call_id, name, args)
            })
            .collect();
        let mut events = Vec::new();
        for item in &items {
            events.push(Ok(ResponseEvent::OutputItemAdded { item: item.clone() }));
            events.push(Ok(ResponseEvent::OutputItemDone { item: item.clone() }));
        }
        events.push(Ok(ResponseEvent::Completed {
            response: snapshot("resp_tools", items),
        }));
        Script::Events(events)
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        async fn stream_response(
            &self,
            request: ResponseRequest,
        ) -> Result<ResponseEventStream, InferenceError> {
            match self.next(request) {
                Script::Events(events) => Ok(Box::pin(futures::stream::iter(events))),
                Script::Hang => Ok(Box::pin(futures::stream::pending::<
                    Result<ResponseEvent, InferenceError>,
                >())),
                Script::Fail(e) => Err(e),
            }
        }

        async fn create_response(
            &self,
            request: ResponseRequest,
        ) -> Result<Vec<OutputItem>, InferenceError> {
            match self.next(request) {
                Script::Events(events) => {
                    let mut output = Vec::new();
                    for event in events {
                        if let ResponseEvent::Completed { response } = event? {
                            output = response.output;
                        }
                    }
                    Ok(output)
                }
                Script::Hang => futures::future::pending::<Result<Vec<OutputItem>, InferenceError>>().await,
                Script::Fail(e) => Err(e),
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
