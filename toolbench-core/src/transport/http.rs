// toolbench-core/src/transport/http.rs

use super::stream::aggregate_sse;
use super::{Transport, TransportError};
use crate::models::chat::ChatRequest;
use crate::models::completion::{ChatCompletion, RawResponse};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

const COMPLETIONS_PATH: &str = "/chat/completions";

/// OpenAI-compatible `/chat/completions` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpTransport {
    /// `base_url` may be the API root (`http://host:8000/v1`) or the full
    /// completions endpoint. An empty `api_key` sends no `Authorization`.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, TransportError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| TransportError::Other(format!("invalid base URL '{base_url}': {e}")))?;
        let trimmed = parsed.as_str().trim_end_matches('/');
        let endpoint = if trimmed.ends_with(COMPLETIONS_PATH) {
            trimmed.to_string()
        } else {
            format!("{trimmed}{COMPLETIONS_PATH}")
        };
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Request)?;
        Ok(Self {
            client,
            endpoint,
            api_key: api_key.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ChatRequest) -> Result<RawResponse, TransportError> {
        debug!(
            endpoint = %self.endpoint,
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            if let Ok(body) = serde_json::to_string_pretty(request) {
                trace!("Request JSON: {}", body);
            }
        }

        let mut builder = self.client.post(&self.endpoint).json(request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        let response = builder.send().await.map_err(TransportError::Request)?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status.to_string()
            } else {
                body
            };
            return Err(TransportError::RateLimited {
                message,
                retry_after,
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = %status, body = %body, "Chat request failed");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;
        trace!("Response body: {}", body);

        if is_event_stream || (request.is_streaming() && body.trim_start().starts_with("data:")) {
            return aggregate_sse(&body).map(RawResponse::Structured);
        }
        parse_body(body)
    }
}

/// JSON objects become completions, JSON strings and non-JSON text become
/// `Text`, any other JSON value is an error.
fn parse_body(body: String) -> Result<RawResponse, TransportError> {
    match serde_json::from_str::<JsonValue>(&body) {
        Ok(value @ JsonValue::Object(_)) => serde_json::from_value::<ChatCompletion>(value)
            .map(RawResponse::Structured)
            .map_err(|e| TransportError::Body(format!("unexpected completion shape: {e}"))),
        Ok(JsonValue::String(text)) => Ok(RawResponse::Text(text)),
        Ok(other) => Err(TransportError::Body(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(_) => Ok(RawResponse::Text(body)),
    }
}
