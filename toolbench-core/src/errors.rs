// toolbench-core/src/errors.rs
use crate::transport::TransportError;
use thiserror::Error;

/// Errors that end a model call or an episode.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Non-retryable failure from the backend.
    #[error("Transport Error: {0}")]
    Transport(#[source] TransportError),

    /// Every attempt was rate limited.
    #[error("Retry Exhausted: gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: TransportError,
    },

    /// The transcript protocol was violated.
    #[error("Transcript Invariant Error: {0}")]
    TranscriptInvariant(String),

    /// Error related to configuration loading or validation.
    #[error("Configuration Error: {0}")]
    Config(String),
}

impl HarnessError {
    pub fn config(msg: impl Into<String>) -> Self {
        HarnessError::Config(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        HarnessError::TranscriptInvariant(msg.into())
    }
}

impl From<TransportError> for HarnessError {
    fn from(error: TransportError) -> Self {
        HarnessError::Transport(error)
    }
}
