//! Tool-call handler: runs one round of model tool calls through the
//! registry and builds both history deltas in lock-step.
//!
//! Every call yields a `FunctionCall` + `FunctionCallOutput` pair in the
//! model-facing history and a single tool-call turn in the user-facing
//! history. Failures become data (`"Error: …"`) so the model can react in its
//! next turn; nothing here aborts the orchestration loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use futures::FutureExt;

use crate::agent_core::stream::StreamEmitter;
use crate::agent_core::types::UserTurn;
use crate::inference::types::{FunctionCall, InputItem, OutputItem};

use super::errors::ToolError;
use super::registry::ToolRegistry;
use super::types::ToolContext;

/// History entries produced by one round of tool dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolRoundOutput {
    /// Paired call/output items, two per invocation.
    pub model_items: Vec<InputItem>,
    /// One tool-call turn per invocation.
    pub user_turns: Vec<UserTurn>,
}

impl ToolRoundOutput {
    /// True when the round contained no tool calls.
    pub fn is_empty(&self) -> bool {
        self.model_items.is_empty()
    }
}

/// Dispatches the function-call items of a model response.
#[derive(Clone)]
pub struct ToolCallHandler {
    registry: Arc<ToolRegistry>,
    parallel: bool,
}

impl ToolCallHandler {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            parallel: false,
        }
    }

    /// Dispatch calls within a round concurrently. Histories still follow
    /// the order in which the model emitted the calls.
    pub fn with_parallel_dispatch(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Invoke every function-call item in `outputs` and build the history
    /// deltas. Non-call items are ignored.
    pub async fn handle_tool_calls(
        &self,
        ctx: &ToolContext,
        outputs: &[OutputItem],
        emitter: &StreamEmitter,
    ) -> ToolRoundOutput {
        let calls: Vec<FunctionCall> = outputs
            .iter()
            .filter_map(OutputItem::as_function_call)
            .collect();

        if calls.is_empty() {
            return ToolRoundOutput::default();
        }

        let outcomes: Vec<Result<String, String>> = if self.parallel {
            join_all(calls.iter().map(|call| self.invoke(ctx, call, emitter))).await
        } else {
            let mut outcomes = Vec::with_capacity(calls.len());
            for call in &calls {
                outcomes.push(self.invoke(ctx, call, emitter).await);
            }
            outcomes
        };

        let mut round = ToolRoundOutput::default();
        for (call, outcome) in calls.iter().zip(outcomes) {
            round.model_items.push(InputItem::FunctionCall {
                call_id: call.call_id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            });
            let output = match &outcome {
                Ok(result) => result.clone(),
                Err(message) => format!("Error: {message}"),
            };
            round.model_items.push(InputItem::FunctionCallOutput {
                call_id: call.call_id.clone(),
                output,
            });
            round.user_turns.push(UserTurn::tool_call(
                &call.call_id,
                &call.name,
                &call.arguments,
                outcome.as_deref().map_err(String::as_str),
            ));
        }
        round
    }

    /// One invocation with stream notifications and a panic boundary.
    async fn invoke(
        &self,
        ctx: &ToolContext,
        call: &FunctionCall,
        emitter: &StreamEmitter,
    ) -> Result<String, String> {
        emitter.send_tool_call_begin(call);
        let start = Instant::now();

        tracing::info!(tool = %call.name, call_id = %call.call_id, "=== TOOL CALL ===");

        let dispatch = self
            .registry
            .dispatch(ctx, &call.call_id, &call.name, &call.arguments);
        let outcome = match AssertUnwindSafe(dispatch).catch_unwind().await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(tool = %call.name, call_id = %call.call_id, panic = %message, "tool handler panicked");
                Err(ToolError::failed(format!("tool panicked: {message}")))
            }
        };
        let outcome = outcome.map_err(|e| e.to_string());

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(result) => tracing::info!(
                tool = %call.name,
                call_id = %call.call_id,
                elapsed_ms,
                result_len = result.len(),
                "tool call succeeded"
            ),
            Err(error) => tracing::warn!(
                tool = %call.name,
                call_id = %call.call_id,
                elapsed_ms,
                error = %error,
                "tool call failed"
            ),
        }

        emitter.send_tool_call_end(call, outcome.as_deref().map_err(String::as_str));
        outcome
    }
}

/// Human-readable text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
