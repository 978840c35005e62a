// toolbench-core/src/lib.rs

#![doc = include_str!("../../README.md")]

pub mod config;
pub mod episode;
pub mod errors;
pub mod handler;
pub mod invoker;
pub mod models;
pub mod normalizer;
pub mod tags;
pub mod transcript;
pub mod transport;

pub use config::{CONFIG_FILE_NAME, HarnessConfig};
pub use episode::{DEFAULT_MAX_STEPS, EpisodeOutcome, ToolExecutor, run_episode};
pub use errors::HarnessError;
pub use handler::{BackendProfile, Capabilities, Handler, HandlerConfig, QueryOutcome};
pub use invoker::{BackoffInvoker, Invocation, RetryPolicy};
pub use models::chat::{ChatMessage, ChatRequest, Role};
pub use models::completion::{ChatCompletion, RawResponse};
pub use models::result::{
    DecodeError, DegradedReason, FunctionCall, ModelResponses, QueryResult,
};
pub use models::tools::{
    ToolArguments, ToolCall, ToolCallIntent, ToolDefinition, ToolFunction,
};
pub use normalizer::{Detection, Normalizer, normalize};
pub use tags::TagExtractor;
pub use transcript::Transcript;
pub use transport::{HttpTransport, Transport, TransportError};

pub use async_trait::async_trait;
