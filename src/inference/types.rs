//! Shared types for the inference client.
//!
//! These mirror the OpenAI Responses API: `InputItem` is one entry of the
//! model-facing history that is replayed on every round, `OutputItem` is one
//! entry of a model response, and `ResponseEvent` is one server-sent event of
//! a streamed response.

use serde::{Deserialize, Serialize};

// ─── Model-facing history ────────────────────────────────────────────────────

/// Message role for plain input messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
}

/// One entry of the model-facing history.
///
/// `FunctionCall` and `FunctionCallOutput` must appear in pairs sharing the
/// same `call_id`, otherwise the provider rejects the replayed history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    Message {
        role: Role,
        content: String,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

impl InputItem {
    /// Plain message with the given role.
    pub fn message(role: Role, content: impl Into<String>) -> Self {
        InputItem::Message {
            role,
            content: content.into(),
        }
    }

    /// Whether this item is one half of a tool-call pair.
    pub fn is_tool_protocol(&self) -> bool {
        matches!(
            self,
            InputItem::FunctionCall { .. } | InputItem::FunctionCallOutput { .. }
        )
    }
}

// ─── Tool descriptors ────────────────────────────────────────────────────────

/// A tool as advertised to the model: unique name, description, and a JSON
/// Schema for its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDescriptor {
    /// Descriptor for a tool that takes no arguments.
    pub fn without_parameters(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }
    }
}

/// Wire form of a function tool in a request body.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionToolParam<'a> {
    pub r#type: &'static str,
    pub name: &'a str,
    pub description: &'a str,
    pub parameters: &'a serde_json::Value,
}

impl<'a> From<&'a ToolDescriptor> for FunctionToolParam<'a> {
    fn from(d: &'a ToolDescriptor) -> Self {
        Self {
            r#type: "function",
            name: &d.name,
            description: &d.description,
            parameters: &d.parameters,
        }
    }
}

// ─── Request ─────────────────────────────────────────────────────────────────

/// Everything a provider needs for one round.
#[derive(Debug, Clone)]
pub struct ResponseRequest {
    pub model: String,
    pub input: Vec<InputItem>,
    pub tools: Vec<ToolDescriptor>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

/// Request body for `POST /responses`.
///
/// `store` is always false: the engine keeps its own history and replays it.
#[derive(Debug, Serialize)]
pub struct ResponsesBody<'a> {
    pub model: &'a str,
    pub input: &'a [InputItem],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<FunctionToolParam<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    pub store: bool,
    pub stream: bool,
}

impl<'a> ResponsesBody<'a> {
    pub fn new(request: &'a ResponseRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            input: &request.input,
            tools: request.tools.iter().map(FunctionToolParam::from).collect(),
            temperature: request.temperature,
            max_output_tokens: request.max_output_tokens,
            store: false,
            stream,
        }
    }
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// One content part of an output message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

/// One item of a model response (`message`, `function_call`, `reasoning`, …).
///
/// Kept as a flat struct rather than an enum so that unknown item types still
/// carry their id through to the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<OutputContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// A function call extracted from an [`OutputItem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub item_id: String,
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

impl OutputItem {
    /// Assistant text message.
    pub fn assistant_message(id: &str, text: &str) -> Self {
        Self {
            kind: "message".into(),
            id: id.into(),
            role: Some("assistant".into()),
            content: vec![OutputContent {
                kind: "output_text".into(),
                text: text.into(),
            }],
            call_id: None,
            name: None,
            arguments: None,
        }
    }

    /// Function call item.
    pub fn function_call(id: &str, call_id: &str, name: &str, arguments: &str) -> Self {
        Self {
            kind: "function_call".into(),
            id: id.into(),
            role: None,
            content: Vec::new(),
            call_id: Some(call_id.into()),
            name: Some(name.into()),
            arguments: Some(arguments.into()),
        }
    }

    pub fn is_message(&self) -> bool {
        self.kind == "message"
    }

    pub fn is_function_call(&self) -> bool {
        self.kind == "function_call"
    }

    /// An assistant message (as opposed to e.g. a refusal-only message).
    pub fn is_assistant_message(&self) -> bool {
        self.is_message() && self.role.as_deref().unwrap_or("assistant") == "assistant"
    }

    /// Concatenated `output_text` parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|c| c.kind == "output_text")
            .map(|c| c.text.as_str())
            .collect()
    }

    /// View this item as a function call, if it is one.
    pub fn as_function_call(&self) -> Option<FunctionCall> {
        if !self.is_function_call() {
            return None;
        }
        Some(FunctionCall {
            item_id: self.id.clone(),
            call_id: self.call_id.clone().unwrap_or_else(|| self.id.clone()),
            name: self.name.clone().unwrap_or_default(),
            arguments: self.arguments.clone().unwrap_or_default(),
        })
    }
}

/// Why a response stopped before completion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IncompleteDetails {
    #[serde(default)]
    pub reason: String,
}

/// Error object attached to a failed response or an `error` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Response object carried by terminal events and non-streaming replies.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseSnapshot {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub incomplete_details: Option<IncompleteDetails>,
    #[serde(default)]
    pub error: Option<ApiError>,
}

/// One event of a streamed response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseEvent {
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: OutputItem },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone { item: OutputItem },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { item_id: String, delta: String },
    #[serde(rename = "response.incomplete")]
    Incomplete { response: ResponseSnapshot },
    #[serde(rename = "response.completed")]
    Completed { response: ResponseSnapshot },
    #[serde(rename = "response.failed")]
    Failed { response: ResponseSnapshot },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: String,
    },
    /// Lifecycle and delta events the engine does not act on.
    #[serde(other)]
    Other,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_items_use_responses_wire_shape() {
        let items = vec![
            InputItem::message(Role::User, "score my paper"),
            InputItem::FunctionCall {
                call_id: "call_1".into(),
                name: "paper_score".into(),
                arguments: "{}".into(),
            },
            InputItem::FunctionCallOutput {
                call_id: "call_1".into(),
                output: "{\"score\":7}".into(),
            },
        ];
        let json = serde_json::to_value(&items).unwrap();
        assert_eq!(json[0]["type"], "message");
        assert_eq!(json[0]["role"], "user");
        assert_eq!(json[1]["type"], "function_call");
        assert_eq!(json[1]["call_id"], "call_1");
        assert_eq!(json[2]["type"], "function_call_output");
        assert_eq!(json[2]["output"], "{\"score\":7}");
    }

    #[test]
    fn test_body_omits_sampling_for_reasoning_models() {
        let request = ResponseRequest {
            model: "gpt-5".into(),
            input: vec![],
            tools: vec![ToolDescriptor::without_parameters("paper_score", "Score")],
            temperature: None,
            max_output_tokens: None,
        };
        let json = serde_json::to_string(&ResponsesBody::new(&request, true)).unwrap();
        assert!(!json.contains("temperature"));
        assert!(!json.contains("max_output_tokens"));
        assert!(json.contains("\"store\":false"));
        assert!(json.contains("\"type\":\"function\""));
    }

    #[test]
    fn test_body_omits_empty_tools() {
        let request = ResponseRequest {
            model: "gpt-4.1-mini".into(),
            input: vec![],
            tools: vec![],
            temperature: Some(0.7),
            max_output_tokens: Some(4000),
        };
        let json = serde_json::to_string(&ResponsesBody::new(&request, false)).unwrap();
        assert!(!json.contains("tools"));
        assert!(json.contains("\"max_output_tokens\":4000"));
    }

    #[test]
    fn test_output_item_text_and_function_call() {
        let msg: OutputItem = serde_json::from_str(
            r#"{"type":"message","id":"msg_1","role":"assistant",
                "content":[{"type":"output_text","text":"Hello "},
                           {"type":"output_text","text":"world"}]}"#,
        )
        .unwrap();
        assert!(msg.is_assistant_message());
        assert_eq!(msg.text(), "Hello world");
        assert!(msg.as_function_call().is_none());

        let call: OutputItem = serde_json::from_str(
            r#"{"type":"function_call","id":"fc_1","call_id":"call_9",
                "name":"paper_score","arguments":"{}"}"#,
        )
        .unwrap();
        let fc = call.as_function_call().unwrap();
        assert_eq!(fc.call_id, "call_9");
        assert_eq!(fc.item_id, "fc_1");
        assert_eq!(fc.name, "paper_score");
    }

    #[test]
    fn test_unknown_event_type_is_other() {
        let event: ResponseEvent = serde_json::from_str(
            r#"{"type":"response.content_part.added","item_id":"x","sequence_number":3}"#,
        )
        .unwrap();
        assert_eq!(event, ResponseEvent::Other);
    }

    #[test]
    fn test_incomplete_event_carries_reason() {
        let event: ResponseEvent = serde_json::from_str(
            r#"{"type":"response.incomplete","response":{"id":"resp_1","output":[],
                "incomplete_details":{"reason":"max_output_tokens"}}}"#,
        )
        .unwrap();
        match event {
            ResponseEvent::Incomplete { response } => {
                assert_eq!(response.id, "resp_1");
                assert_eq!(response.incomplete_details.unwrap().reason, "max_output_tokens");
            }
            other => panic!("expected Incomplete, got {other:?}"),
        }
    }
}
