// toolbench-core/src/transport/mod.rs
//! The outbound model call, behind a trait so the invoker and handler can be
//! driven by an in-memory fake.

mod http;
mod stream;

pub use http::HttpTransport;
pub use stream::aggregate_sse;

use crate::models::chat::ChatRequest;
use crate::models::completion::RawResponse;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Sends one chat request and returns the raw response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<RawResponse, TransportError>;
}

/// Failure classes of one outbound call. Only `RateLimited` is retried.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Server-provided wait, from `Retry-After`.
        retry_after: Option<Duration>,
    },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("unreadable response body: {0}")]
    Body(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        TransportError::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, TransportError::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limits_carry_hints() {
        let limited = TransportError::RateLimited {
            message: "slow down".to_string(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(limited.is_rate_limit());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(3)));

        let status = TransportError::Status {
            status: 401,
            body: "unauthorized".to_string(),
        };
        assert!(!status.is_rate_limit());
        assert_eq!(status.retry_after(), None);
        assert_eq!(status.to_string(), "HTTP 401: unauthorized");
    }
}
