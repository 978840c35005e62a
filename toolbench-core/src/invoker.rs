// toolbench-core/src/invoker.rs
//! Bounded exponential backoff around one model call.

use crate::errors::HarnessError;
use crate::models::chat::ChatRequest;
use crate::models::completion::RawResponse;
use crate::transport::{Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How many times to call and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 act as 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `retry` (0-based): `base * multiplier^retry`,
    /// clamped to `max_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Actual wait: the backoff delay raised to any server hint, never above
    /// `max_delay`.
    pub fn wait_for(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let delay = self.delay_for_retry(retry);
        hint.map_or(delay, |hint| delay.max(hint)).min(self.max_delay)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// A successful call: the raw response plus timing.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub response: RawResponse,
    /// Wall time from the first attempt to the response, waits included.
    pub latency: Duration,
    pub attempts: u32,
}

/// Calls the transport, retrying only on rate limits.
#[derive(Clone)]
pub struct BackoffInvoker {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl BackoffInvoker {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn invoke(&self, request: &ChatRequest) -> Result<Invocation, HarnessError> {
        let max_attempts = self.policy.attempts();
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            debug!(attempt, max_attempts, model = %request.model, "Invoking model");
            match self.transport.send(request).await {
                Ok(response) => {
                    let latency = started.elapsed();
                    debug!(
                        attempt,
                        latency_ms = latency.as_millis() as u64,
                        "Model call succeeded"
                    );
                    return Ok(Invocation {
                        response,
                        latency,
                        attempts: attempt,
                    });
                }
                Err(err @ TransportError::RateLimited { .. }) => {
                    if attempt >= max_attempts {
                        warn!(
                            attempts = attempt,
                            error = %err,
                            "Rate limited on every attempt, giving up"
                        );
                        return Err(HarnessError::RetryExhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    let wait = self.policy.wait_for(attempt - 1, err.retry_after());
                    warn!(
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "Model call failed");
                    return Err(HarnessError::Transport(err));
                }
            }
        }
    }
}
