//! OpenAI Responses API client.
//!
//! `ModelProvider` is the seam the orchestration loop talks through;
//! `ResponsesClient` implements it over `POST {base_url}/responses` with
//! bearer auth. History is replayed on every round (`store: false`).

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client as HttpClient;

use super::errors::InferenceError;
use super::streaming::{parse_non_streaming_response, parse_sse_stream};
use super::types::{OutputItem, ResponseEvent, ResponseRequest, ResponsesBody};
use crate::config::ProviderConfig;

/// Boxed stream of response events returned by [`ModelProvider::stream_response`].
pub type ResponseEventStream =
    Pin<Box<dyn Stream<Item = Result<ResponseEvent, InferenceError>> + Send>>;

/// Anything that can answer a round of model-facing history.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Submit a request and stream back typed events.
    async fn stream_response(
        &self,
        request: ResponseRequest,
    ) -> Result<ResponseEventStream, InferenceError>;

    /// Submit a request and return only the final output items.
    async fn create_response(
        &self,
        request: ResponseRequest,
    ) -> Result<Vec<OutputItem>, InferenceError>;
}

// ─── ResponsesClient ─────────────────────────────────────────────────────────

/// Client for an OpenAI-compatible Responses endpoint.
///
/// Holds two HTTP clients: one with a short total timeout for non-streaming
/// calls and one with the long stream timeout.
pub struct ResponsesClient {
    http: HttpClient,
    http_stream: HttpClient,
    base_url: String,
    api_key: String,
    connect_timeout_secs: u64,
    stream_timeout_secs: u64,
}

impl ResponsesClient {
    /// Build a client from the provider section of the engine config.
    ///
    /// Does NOT check connectivity; that happens on the first request.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, InferenceError> {
        let connect = Duration::from_secs(config.connect_timeout_secs);

        let http = HttpClient::builder()
            .connect_timeout(connect)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let http_stream = HttpClient::builder()
            .connect_timeout(connect)
            .timeout(Duration::from_secs(config.stream_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build streaming HTTP client: {e}"),
            })?;

        if config.base_url.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "provider.base_url is empty".into(),
            });
        }

        Ok(Self {
            http,
            http_stream,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            connect_timeout_secs: config.connect_timeout_secs,
            stream_timeout_secs: config.stream_timeout_secs,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/responses", self.base_url)
    }

    async fn post(
        &self,
        http: &HttpClient,
        request: &ResponseRequest,
        stream: bool,
        timeout_secs: u64,
    ) -> Result<reqwest::Response, InferenceError> {
        let url = self.endpoint();
        let body = ResponsesBody::new(request, stream);

        tracing::info!(
            url = %url,
            model = %request.model,
            input_count = request.input.len(),
            tool_count = request.tools.len(),
            stream,
            "=== MODEL REQUEST ==="
        );

        let mut builder = http.post(&url).json(&body);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .send()
            .await
            .map_err(|e| InferenceError::from_reqwest(&url, e, timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "model request rejected");
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelProvider for ResponsesClient {
    async fn stream_response(
        &self,
        request: ResponseRequest,
    ) -> Result<ResponseEventStream, InferenceError> {
        let response = self
            .post(&self.http_stream, &request, true, self.stream_timeout_secs)
            .await?;
        Ok(parse_sse_stream(response).boxed())
    }

    async fn create_response(
        &self,
        request: ResponseRequest,
    ) -> Result<Vec<OutputItem>, InferenceError> {
        let response = self
            .post(&self.http, &request, false, self.connect_timeout_secs)
            .await?;
        let body_text = response.text().await.map_err(|e| InferenceError::StreamError {
            reason: format!("failed to read response body: {e}"),
        })?;
        Ok(parse_non_streaming_response(&body_text)?.output)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
