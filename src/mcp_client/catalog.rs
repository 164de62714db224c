//! Remote tool catalog: handshake, discovery, and proxy handlers.
//!
//! `CatalogLoader` opens a session with the catalog server and registers one
//! `DynamicTool` per listed schema. Once registered, catalog tools are
//! dispatched exactly like built-in ones.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::toolkit::{CallRecordStore, ToolContext, ToolError, ToolHandler, ToolOutput, ToolRegistry};

use super::errors::McpError;
use super::transport::{extract_payload, next_request_id, HttpTransport};
use super::types::{CatalogToolSchema, JsonRpcRequest, ListToolsResult, PROTOCOL_VERSION};

// ─── CatalogLoader ───────────────────────────────────────────────────────────

/// Loads tools from a remote catalog into a [`ToolRegistry`].
pub struct CatalogLoader {
    transport: HttpTransport,
    records: CallRecordStore,
    client_name: String,
}

impl CatalogLoader {
    pub fn new(
        uri: &str,
        client_name: &str,
        timeout: Duration,
        records: CallRecordStore,
    ) -> Result<Self, McpError> {
        Ok(Self {
            transport: HttpTransport::new(uri, timeout)?,
            records,
            client_name: client_name.to_string(),
        })
    }

    pub fn session_id(&self) -> Option<&str> {
        self.transport.session_id()
    }

    /// Run the handshake and keep the issued session id.
    pub async fn initialize(&mut self) -> Result<String, McpError> {
        let init = JsonRpcRequest::new(
            next_request_id(),
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": self.client_name,
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        );
        let reply = self.transport.post(&init).await.map_err(|e| McpError::InitFailed {
            reason: format!("initialize failed: {e}"),
        })?;
        let session_id = reply.session_id.ok_or_else(|| McpError::InitFailed {
            reason: "no session ID returned from initialize".into(),
        })?;
        self.transport.set_session_id(session_id.clone());

        self.transport
            .notify("notifications/initialized", json!({}))
            .await
            .map_err(|e| McpError::InitFailed {
                reason: format!("notifications/initialized failed: {e}"),
            })?;

        tracing::info!(uri = %self.transport.uri(), session_id = %session_id, "catalog session initialized");
        Ok(session_id)
    }

    /// Fetch `tools/list` and register a proxy for each tool. Returns the
    /// number of tools registered.
    pub async fn load_tools(&self, registry: &mut ToolRegistry) -> Result<usize, McpError> {
        if self.transport.session_id().is_none() {
            return Err(McpError::InitFailed {
                reason: "catalog session not initialized, call initialize first".into(),
            });
        }

        let result = self.transport.request("tools/list", json!({})).await?;
        let listed: ListToolsResult =
            serde_json::from_value(result).map_err(|e| McpError::ProtocolError {
                reason: format!("failed to parse tools/list result: {e}"),
            })?;

        let transport = Arc::new(self.transport.clone());
        for schema in &listed.tools {
            let tool = DynamicTool::new(schema, transport.clone(), self.records.clone());
            registry.register(&schema.name, schema.descriptor(), Arc::new(tool));
            tracing::info!(tool = %schema.name, "registered catalog tool");
        }
        Ok(listed.tools.len())
    }
}

// ─── DynamicTool ─────────────────────────────────────────────────────────────

/// Proxy handler forwarding calls to the catalog server over its session.
pub struct DynamicTool {
    name: String,
    transport: Arc<HttpTransport>,
    records: CallRecordStore,
}

impl DynamicTool {
    pub fn new(schema: &CatalogToolSchema, transport: Arc<HttpTransport>, records: CallRecordStore) -> Self {
        Self {
            name: schema.name.clone(),
            transport,
            records,
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, McpError> {
        let message = JsonRpcRequest::new(
            next_request_id(),
            "tools/call",
            json!({ "name": self.name, "arguments": arguments }),
        );
        let reply = self.transport.post(&message).await?;
        extract_payload(&reply.body).map(str::to_string)
    }
}

#[async_trait]
impl ToolHandler for DynamicTool {
    async fn call(
        &self,
        ctx: &ToolContext,
        call_id: &str,
        args: &str,
    ) -> Result<ToolOutput, ToolError> {
        let arguments: serde_json::Map<String, serde_json::Value> = serde_json::from_str(args)
            .map_err(|e| ToolError::failed(format!("invalid arguments for {}: {e}", self.name)))?;
        let arguments = serde_json::Value::Object(arguments);

        let record = self.records.create(ctx, call_id, &self.name, &arguments)?;

        match self.execute(arguments).await {
            Ok(payload) => {
                self.records.mark_success(&record.id, &payload)?;
                Ok(ToolOutput::text(payload))
            }
            Err(e) => {
                let reason = format!("failed to execute tool {}: {e}", self.name);
                self.records.mark_error(&record.id, &reason)?;
                tracing::warn!(tool = %self.name, call_id = %call_id, error = %e, "catalog tool failed");
                Err(ToolError::failed(reason))
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
