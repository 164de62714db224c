//! JSON-RPC over HTTP transport.
//!
//! Every message is a `POST` to the catalog URI. Replies arrive either as a
//! plain JSON body or as a server-sent-event body whose `data:` line carries
//! the JSON. After `initialize` every request carries the session header.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::errors::McpError;
use super::types::{JsonRpcRequest, JsonRpcResponse, SESSION_HEADER};

// ─── Request ID Generator ────────────────────────────────────────────────────

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// A raw reply: the session header, if any, and the body text.
#[derive(Debug)]
pub struct RawReply {
    pub session_id: Option<String>,
    pub body: String,
}

/// HTTP JSON-RPC transport bound to one catalog endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    uri: String,
    session_id: Option<String>,
}

impl HttpTransport {
    pub fn new(uri: &str, timeout: Duration) -> Result<Self, McpError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| McpError::TransportError {
                endpoint: uri.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            uri: uri.to_string(),
            session_id: None,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn set_session_id(&mut self, session_id: String) {
        self.session_id = Some(session_id);
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            endpoint: self.uri.clone(),
            reason,
        }
    }

    /// POST one message and return the raw reply.
    pub async fn post(&self, message: &JsonRpcRequest) -> Result<RawReply, McpError> {
        let mut request = self
            .http
            .post(&self.uri)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .json(message);
        if let Some(session_id) = &self.session_id {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(format!("failed to make request: {e}")))?;

        let status = response.status();
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(self.transport_error(format!("{} returned {status}: {body}", message.method)));
        }
        Ok(RawReply { session_id, body })
    }

    /// Send a request and return the JSON payload text of the reply.
    pub async fn request_raw(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<String, McpError> {
        let message = JsonRpcRequest::new(next_request_id(), method, params);
        let reply = self.post(&message).await?;
        extract_payload(&reply.body).map(str::to_string)
    }

    /// Send a request and return its `result`.
    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let payload = self.request_raw(method, params).await?;
        let response: JsonRpcResponse =
            serde_json::from_str(&payload).map_err(|e| McpError::ProtocolError {
                reason: format!("failed to parse JSON-RPC response: {e}. JSON data: {payload}"),
            })?;
        extract_result(response)
    }

    /// Send a notification. The reply body is ignored.
    pub async fn notify(&self, method: &str, params: serde_json::Value) -> Result<(), McpError> {
        self.post(&JsonRpcRequest::notification(method, params))
            .await
            .map(|_| ())
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// JSON text of a reply body: the first SSE `data:` line, or the body itself
/// when it is plain JSON.
pub fn extract_payload(body: &str) -> Result<&str, McpError> {
    if let Some(data) = body
        .lines()
        .find_map(|line| line.strip_prefix("data:"))
    {
        return Ok(data.trim());
    }
    let trimmed = body.trim();
    if trimmed.starts_with('{') {
        return Ok(trimmed);
    }
    Err(McpError::ProtocolError {
        reason: "no data line found in SSE response".into(),
    })
}

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ProtocolError {
        reason: "response missing both result and error".into(),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::JsonRpcError;

    #[test]
    fn test_next_request_id_is_monotonic() {
        let id1 = next_request_id();
        let id2 = next_request_id();
        assert!(id2 > id1);
    }

    #[test]
    fn test_extract_payload_from_sse_and_json() {
        let sse = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n";
        assert_eq!(
            extract_payload(sse).unwrap(),
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}"
        );
        assert_eq!(extract_payload("  {\"a\":1}\n").unwrap(), "{\"a\":1}");
        assert!(matches!(
            extract_payload("event: ping\n\n"),
            Err(McpError::ProtocolError { .. })
        ));
    }

    #[test]
    fn test_extract_result_error() {
        let resp = JsonRpcResponse {
            id: None,
            result: None,
            error: Some(JsonRpcError {
                code: -32601,
                message: "Method not found".into(),
                data: None,
            }),
        };
        match extract_result(resp).unwrap_err() {
            McpError::ServerError { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected ServerError, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_result_missing_both() {
        let resp = JsonRpcResponse {
            id: None,
            result: None,
            error: None,
        };
        assert!(matches!(
            extract_result(resp),
            Err(McpError::ProtocolError { .. })
        ));
    }

    #[tokio::test]
    async fn test_session_header_sent_after_it_is_set() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/mcp")
            .match_header(SESSION_HEADER, "sess-1")
            .match_header("accept", "application/json, text/event-stream")
            .with_status(200)
            .with_body("data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n")
            .create_async()
            .await;

        let mut transport =
            HttpTransport::new(&format!("{}/mcp", server.url()), Duration::from_secs(5)).unwrap();
        transport.set_session_id("sess-1".into());
        let result = transport.request("ping", serde_json::json!({})).await.unwrap();

        assert_eq!(result["ok"], true);
        mock.assert_async().await;
    }
}
