//! Inference: model-provider contract and the Responses API client.
//!
//! This module handles all communication with the language model:
//! - Streaming and non-streaming response requests
//! - SSE event parsing into typed `ResponseEvent`s
//! - The model-facing history item types replayed every round
//! - The catalogue of selectable language models
//!
//! The orchestration loop only sees the `ModelProvider` trait, so tests and
//! alternative backends plug in without touching the loop.

pub mod client;
pub mod errors;
pub mod models;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use client::{ModelProvider, ResponseEventStream, ResponsesClient};
pub use errors::InferenceError;
pub use models::LanguageModel;
pub use types::{
    FunctionCall, InputItem, OutputItem, ResponseEvent, ResponseRequest, ResponseSnapshot, Role,
    ToolDescriptor,
};
