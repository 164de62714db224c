//! Tool registry: name → (descriptor, handler).
//!
//! Built once at startup, then shared read-only (`Arc<ToolRegistry>`) by
//! every conversation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::inference::types::ToolDescriptor;

use super::errors::ToolError;
use super::types::{ToolContext, ToolHandler};

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

/// Lookup table for every tool the model may call.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration under the same name replaces
    /// the earlier one.
    pub fn register(
        &mut self,
        name: &str,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) {
        if self.tools.contains_key(name) {
            tracing::warn!(tool = %name, "tool re-registered, replacing previous handler");
        }
        self.tools.insert(
            name.to_string(),
            RegisteredTool {
                descriptor,
                handler,
            },
        );
    }

    /// Invoke the handler registered under `name`.
    ///
    /// When the handler supplies a non-empty further instruction, the result
    /// is wrapped as `<RESULT>…</RESULT>\n<INSTRUCTION>…</INSTRUCTION>`.
    pub async fn dispatch(
        &self,
        ctx: &ToolContext,
        call_id: &str,
        name: &str,
        args: &str,
    ) -> Result<String, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_string(),
        })?;

        let output = tool.handler.call(ctx, call_id, args).await?;
        match output.further_instruction.as_deref() {
            Some(instruction) if !instruction.is_empty() => Ok(format!(
                "<RESULT>{}</RESULT>\n<INSTRUCTION>{}</INSTRUCTION>",
                output.result, instruction
            )),
            _ => Ok(output.result),
        }
    }

    /// All registered descriptors, in no particular order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolkit::types::ToolOutput;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct Fixed(ToolOutput);

    #[async_trait]
    impl ToolHandler for Fixed {
        async fn call(&self, _: &ToolContext, _: &str, _: &str) -> Result<ToolOutput, ToolError> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl ToolHandler for Failing {
        async fn call(&self, _: &ToolContext, _: &str, _: &str) -> Result<ToolOutput, ToolError> {
            Err(ToolError::failed("upstream rejected"))
        }
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor::without_parameters(name, "test tool")
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .dispatch(&ToolContext::default(), "c1", "nope", "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { ref name } if name == "nope"));
    }

    #[tokio::test]
    async fn test_dispatch_wraps_further_instruction() {
        let mut registry = ToolRegistry::new();
        registry.register(
            "score",
            descriptor("score"),
            Arc::new(Fixed(ToolOutput::with_instruction("{\"score\":7}", "call next"))),
        );
        let out = registry
            .dispatch(&ToolContext::default(), "c1", "score", "{}")
            .await
            .unwrap();
        assert_eq!(
            out,
            "<RESULT>{\"score\":7}</RESULT>\n<INSTRUCTION>call next</INSTRUCTION>"
        );
    }

    #[tokio::test]
    async fn test_empty_instruction_is_not_wrapped() {
        let mut registry = ToolRegistry::new();
        registry.register(
            "echo",
            descriptor("echo"),
            Arc::new(Fixed(ToolOutput::with_instruction("plain", ""))),
        );
        let out = registry
            .dispatch(&ToolContext::default(), "c1", "echo", "{}")
            .await
            .unwrap();
        assert_eq!(out, "plain");
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let mut registry = ToolRegistry::new();
        registry.register("t", descriptor("t"), Arc::new(Fixed(ToolOutput::text("first"))));
        registry.register("t", descriptor("t"), Arc::new(Fixed(ToolOutput::text("second"))));
        assert_eq!(registry.len(), 1);
        let out = registry
            .dispatch(&ToolContext::default(), "c1", "t", "{}")
            .await
            .unwrap();
        assert_eq!(out, "second");
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let mut registry = ToolRegistry::new();
        registry.register("bad", descriptor("bad"), Arc::new(Failing));
        let err = registry
            .dispatch(&ToolContext::default(), "c1", "bad", "{}")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "upstream rejected");
    }

    #[test]
    fn test_descriptors_set_equality() {
        let mut registry = ToolRegistry::new();
        for name in ["a", "b", "c"] {
            registry.register(name, descriptor(name), Arc::new(Failing));
        }
        let names: HashSet<String> = registry.descriptors().into_iter().map(|d| d.name).collect();
        let expected: HashSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(names, expected);
    }
}
