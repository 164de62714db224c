//! MCP Client: remote tool catalog over HTTP JSON-RPC.
//!
//! This module handles:
//! - The session handshake (`initialize` then `notifications/initialized`)
//! - Tool discovery via `tools/list`
//! - Proxy handlers forwarding `tools/call` with the session header
//!
//! Catalog tools are registered into the same `ToolRegistry` as the
//! built-in tools.

pub mod catalog;
pub mod errors;
pub mod transport;
pub mod types;

pub use catalog::{CatalogLoader, DynamicTool};
pub use errors::McpError;
pub use transport::HttpTransport;
pub use types::{CatalogToolSchema, JsonRpcRequest, JsonRpcResponse};
