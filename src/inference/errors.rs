//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to
//! build meaningful log entries.

use thiserror::Error;

/// Errors that can occur while talking to the model provider.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// SSE stream parsing or chunk-level error.
    #[error("stream error: {reason}")]
    StreamError { reason: String },

    /// The provider reported a failed response or an in-stream error event.
    #[error("response failed ({}): {message}", code.as_deref().unwrap_or("unknown"))]
    ResponseFailed {
        code: Option<String>,
        message: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl InferenceError {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            InferenceError::ConnectionFailed { .. } | InferenceError::Timeout { .. } => true,
            InferenceError::HttpError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Map a `reqwest` send/read error onto the taxonomy.
    pub(crate) fn from_reqwest(endpoint: &str, e: reqwest::Error, timeout_secs: u64) -> Self {
        if e.is_timeout() {
            InferenceError::Timeout {
                duration_secs: timeout_secs,
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(InferenceError::Timeout { duration_secs: 5 }.is_transient());
        assert!(InferenceError::HttpError {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!InferenceError::HttpError {
            status: 401,
            body: String::new()
        }
        .is_transient());
        assert!(!InferenceError::StreamError {
            reason: "bad".into()
        }
        .is_transient());
    }

    #[test]
    fn test_response_failed_display() {
        let with_code = InferenceError::ResponseFailed {
            code: Some("server_error".into()),
            message: "boom".into(),
        };
        assert_eq!(with_code.to_string(), "response failed (server_error): boom");
        let without = InferenceError::ResponseFailed {
            code: None,
            message: "boom".into(),
        };
        assert_eq!(without.to_string(), "response failed (unknown): boom");
    }
}
