//! Toolkit: everything the model can call, and how calls are recorded.
//!
//! Submodules:
//! - `registry`: name → descriptor + handler, result/instruction wrapping
//! - `handler`: per-round dispatch building both history deltas
//! - `records`: call-record lifecycle and cooldown gate
//! - `tools`: built-in `paper_score` and `paper_score_comment`
//! - `types`: tool context, output, and the handler trait
//! - `errors`: tool-level error types

pub mod errors;
pub mod handler;
pub mod records;
pub mod registry;
pub mod tools;
pub mod types;

pub use errors::ToolError;
pub use handler::{ToolCallHandler, ToolRoundOutput};
pub use records::{CallRecord, CallRecordStore, CallStatus};
pub use registry::ToolRegistry;
pub use tools::{register_builtin_tools, BuiltinToolDeps};
pub use types::{ToolContext, ToolHandler, ToolOutput};
