// toolbench-core/src/handler.rs
//! Binds a backend's request conventions to the invoker and normalizer.

use crate::errors::HarnessError;
use crate::invoker::{BackoffInvoker, RetryPolicy};
use crate::models::chat::{ChatMessage, ChatRequest};
use crate::models::result::QueryResult;
use crate::models::tools::{ToolDefinition, ToolSpec};
use crate::normalizer::{Detection, Normalizer};
use crate::transcript::Transcript;
use crate::transport::{HttpTransport, Transport};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const FC_SUFFIX: &str = "-FC";

/// What a backend can express natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Returns native `tool_calls` instead of tagged text.
    pub structured_tool_calls: bool,
    /// Returns reasoning in `reasoning_content` instead of `<think>` text.
    pub structured_reasoning: bool,
    /// Accepts `stream: true` on requests that carry tools.
    pub streaming_with_tools: bool,
}

impl From<&Capabilities> for Detection {
    // Tagged detection stays on as a fallback for models that ignore the
    // native fields.
    fn from(capabilities: &Capabilities) -> Self {
        Detection {
            native_tool_calls: capabilities.structured_tool_calls,
            tagged_tool_calls: true,
            native_reasoning: capabilities.structured_reasoning,
            tagged_reasoning: true,
        }
    }
}

/// Named presets for the serving backends we evaluate against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendProfile {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    LlamaFactory,
    LlamaFactoryReasoning,
    Tagged,
}

impl BackendProfile {
    pub const ALL: [BackendProfile; 4] = [
        BackendProfile::OpenAi,
        BackendProfile::LlamaFactory,
        BackendProfile::LlamaFactoryReasoning,
        BackendProfile::Tagged,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BackendProfile::OpenAi => "openai",
            BackendProfile::LlamaFactory => "llama-factory",
            BackendProfile::LlamaFactoryReasoning => "llama-factory-reasoning",
            BackendProfile::Tagged => "tagged",
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            BackendProfile::OpenAi => Capabilities {
                structured_tool_calls: true,
                structured_reasoning: true,
                streaming_with_tools: true,
            },
            BackendProfile::LlamaFactory => Capabilities {
                structured_tool_calls: true,
                structured_reasoning: false,
                streaming_with_tools: false,
            },
            BackendProfile::LlamaFactoryReasoning => Capabilities {
                structured_tool_calls: true,
                structured_reasoning: true,
                streaming_with_tools: false,
            },
            BackendProfile::Tagged => Capabilities {
                structured_tool_calls: false,
                structured_reasoning: false,
                streaming_with_tools: false,
            },
        }
    }

    fn always_enables_thinking(&self) -> bool {
        matches!(
            self,
            BackendProfile::LlamaFactory | BackendProfile::LlamaFactoryReasoning
        )
    }

    fn requests_parallel_tool_calls(&self) -> bool {
        matches!(self, BackendProfile::LlamaFactoryReasoning)
    }

    fn opts_out_of_storage(&self) -> bool {
        matches!(self, BackendProfile::LlamaFactory)
    }
}

impl fmt::Display for BackendProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendProfile {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendProfile::ALL
            .into_iter()
            .find(|profile| profile.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let known: Vec<&str> = BackendProfile::ALL.iter().map(|p| p.name()).collect();
                HarnessError::config(format!(
                    "unknown backend profile '{s}' (expected one of: {})",
                    known.join(", ")
                ))
            })
    }
}

/// Everything a [`Handler`] needs, passed in explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub profile: BackendProfile,
    pub capabilities: Capabilities,
    /// Ask for a streamed response when the backend allows it.
    pub stream: bool,
    /// Serve `model` without a trailing `-FC`.
    pub strip_fc_suffix: bool,
    /// Merged into every request body last, overriding handler defaults.
    pub extra_body: Map<String, JsonValue>,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl HandlerConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        profile: BackendProfile,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: None,
            profile,
            capabilities: profile.capabilities(),
            stream: false,
            strip_fc_suffix: false,
            extra_body: Map::new(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(600),
        }
    }

    /// Model id as sent on the wire.
    pub fn served_model_name(&self) -> &str {
        if self.strip_fc_suffix {
            self.model.strip_suffix(FC_SUFFIX).unwrap_or(&self.model)
        } else {
            &self.model
        }
    }
}

/// One normalized call plus its timing.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub result: QueryResult,
    pub latency: Duration,
    pub attempts: u32,
}

/// Shapes requests for one backend and normalizes its responses.
///
/// `Send + Sync`; share it behind an `Arc` across concurrent episodes.
#[derive(Clone)]
pub struct Handler {
    config: HandlerConfig,
    invoker: BackoffInvoker,
    normalizer: Normalizer,
}

impl Handler {
    /// Builds a handler backed by [`HttpTransport`].
    pub fn new(config: HandlerConfig) -> Result<Self, HarnessError> {
        let transport =
            HttpTransport::new(&config.base_url, &config.api_key, config.request_timeout)
                .map_err(|e| HarnessError::config(e.to_string()))?;
        info!(
            endpoint = %transport.endpoint(),
            model = %config.served_model_name(),
            profile = %config.profile,
            "Handler ready"
        );
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: HandlerConfig, transport: Arc<dyn Transport>) -> Self {
        let invoker = BackoffInvoker::new(transport, config.retry.clone());
        let normalizer = Normalizer::with_detection(Detection::from(&config.capabilities));
        Self {
            config,
            invoker,
            normalizer,
        }
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn build_request(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        function_calling: bool,
    ) -> ChatRequest {
        let attach_tools = function_calling && !tools.is_empty();
        let tools = attach_tools.then(|| tools.iter().map(ToolSpec::from).collect::<Vec<_>>());

        let mut extra = Map::new();
        let stream = if self.config.stream
            && (!attach_tools || self.config.capabilities.streaming_with_tools)
        {
            extra.insert("stream_options".to_string(), json!({ "include_usage": true }));
            Some(true)
        } else {
            if self.config.stream {
                debug!(
                    profile = %self.config.profile,
                    "Streaming disabled: backend cannot stream with tools"
                );
            }
            None
        };

        let model = self.config.served_model_name();
        if self.config.profile.always_enables_thinking()
            || model.to_lowercase().contains("thinking")
        {
            extra.insert("enable_thinking".to_string(), JsonValue::Bool(true));
        }
        if attach_tools && self.config.profile.requests_parallel_tool_calls() {
            extra.insert("parallel_tool_calls".to_string(), JsonValue::Bool(true));
        }
        if self.config.profile.opts_out_of_storage() {
            extra.insert("store".to_string(), JsonValue::Bool(false));
        }
        for (key, value) in &self.config.extra_body {
            extra.insert(key.clone(), value.clone());
        }

        ChatRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            temperature: self.config.temperature,
            tools,
            stream,
            extra,
        }
    }

    /// Sends the transcript and normalizes the reply. Does not modify the
    /// transcript.
    pub async fn query(
        &self,
        transcript: &Transcript,
        tools: &[ToolDefinition],
        function_calling: bool,
    ) -> Result<QueryOutcome, HarnessError> {
        let request = self.build_request(transcript.messages(), tools, function_calling);
        let invocation = self.invoker.invoke(&request).await?;
        let result = self.normalizer.normalize(&invocation, function_calling);
        debug!(
            latency_ms = invocation.latency.as_millis() as u64,
            attempts = invocation.attempts,
            tool_calls = result.tool_call_ids.len(),
            input_token = result.input_token,
            output_token = result.output_token,
            "Query complete"
        );
        Ok(QueryOutcome {
            result,
            latency: invocation.latency,
            attempts: invocation.attempts,
        })
    }

    /// [`Handler::query`] followed by appending the assistant turn.
    pub async fn step(
        &self,
        transcript: &mut Transcript,
        tools: &[ToolDefinition],
        function_calling: bool,
    ) -> Result<QueryOutcome, HarnessError> {
        if transcript.is_awaiting_tool_results() {
            return Err(HarnessError::invariant(format!(
                "cannot query while tool calls are outstanding: {:?}",
                transcript.pending_call_ids()
            )));
        }
        let outcome = self.query(transcript, tools, function_calling).await?;
        transcript.append_assistant(&outcome.result)?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::tests::ScriptedTransport;
    use crate::models::completion::{ChatCompletion, CompletionMessage, RawResponse, RawToolCall};
    use crate::transport::TransportError;

    fn weather_tool() -> ToolDefinition {
        ToolDefinition {
            name: "get_weather".to_string(),
            description: "Look up the weather".to_string(),
            parameters: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
        }
    }

    fn handler(
        config: HandlerConfig,
        script: Vec<Result<RawResponse, TransportError>>,
    ) -> (Handler, Arc<ScriptedTransport>) {
        let transport = ScriptedTransport::new(script);
        (Handler::with_transport(config, transport.clone()), transport)
    }

    fn config(profile: BackendProfile) -> HandlerConfig {
        HandlerConfig::new("http://localhost:8000/v1", "EMPTY", "qwen3-4b", profile)
    }

    #[test]
    fn profiles_parse_by_name() {
        for profile in BackendProfile::ALL {
            assert_eq!(profile.name().parse::<BackendProfile>().unwrap(), profile);
        }
        assert_eq!("OpenAI".parse::<BackendProfile>().unwrap(), BackendProfile::OpenAi);
        assert!(matches!(
            "vllm".parse::<BackendProfile>(),
            Err(HarnessError::Config(_))
        ));
    }

    #[test]
    fn tools_attached_only_in_function_calling_mode() {
        let (handler, _) = handler(config(BackendProfile::OpenAi), Vec::new());
        let messages = [ChatMessage::user("hi")];

        let request = handler.build_request(&messages, &[weather_tool()], true);
        let tools = request.tools.as_ref().unwrap();
        assert_eq!(tools[0].function.name, "get_weather");

        assert!(handler.build_request(&messages, &[weather_tool()], false).tools.is_none());
        assert!(handler.build_request(&messages, &[], true).tools.is_none());
    }

    #[test]
    fn streaming_dropped_when_backend_cannot_stream_tools() {
        let mut cfg = config(BackendProfile::LlamaFactory);
        cfg.stream = true;
        let (handler, _) = handler(cfg, Vec::new());
        let messages = [ChatMessage::user("hi")];

        let with_tools = handler.build_request(&messages, &[weather_tool()], true);
        assert_eq!(with_tools.stream, None);
        assert!(!with_tools.extra.contains_key("stream_options"));

        let without_tools = handler.build_request(&messages, &[weather_tool()], false);
        assert_eq!(without_tools.stream, Some(true));
        assert_eq!(without_tools.extra["stream_options"], json!({"include_usage": true}));

        let mut cfg = config(BackendProfile::OpenAi);
        cfg.stream = true;
        let (openai, _) = super::tests::handler(cfg, Vec::new());
        assert_eq!(
            openai.build_request(&messages, &[weather_tool()], true).stream,
            Some(true)
        );
    }

    #[test]
    fn backend_options_follow_profile_and_model() {
        let messages = [ChatMessage::user("hi")];

        let (plain, _) = handler(config(BackendProfile::OpenAi), Vec::new());
        assert!(plain.build_request(&messages, &[], true).extra.is_empty());

        let (llama, _) = handler(config(BackendProfile::LlamaFactory), Vec::new());
        let request = llama.build_request(&messages, &[weather_tool()], true);
        assert_eq!(request.extra["store"], false);
        assert!(!request.extra.contains_key("parallel_tool_calls"));

        let mut cfg = config(BackendProfile::OpenAi);
        cfg.model = "Qwen3-4B-Thinking-2507-FC".to_string();
        cfg.strip_fc_suffix = true;
        let (thinking, _) = handler(cfg, Vec::new());
        let request = thinking.build_request(&messages, &[], true);
        assert_eq!(request.model, "Qwen3-4B-Thinking-2507");
        assert_eq!(request.extra["enable_thinking"], true);

        let (reasoning, _) = handler(config(BackendProfile::LlamaFactoryReasoning), Vec::new());
        let request = reasoning.build_request(&messages, &[weather_tool()], true);
        assert_eq!(request.extra["enable_thinking"], true);
        assert_eq!(request.extra["parallel_tool_calls"], true);
        assert!(
            !reasoning
                .build_request(&messages, &[], true)
                .extra
                .contains_key("parallel_tool_calls")
        );
    }

    #[test]
    fn extra_body_overrides_handler_defaults() {
        let mut cfg = config(BackendProfile::LlamaFactory);
        cfg.extra_body.insert("enable_thinking".to_string(), json!(false));
        cfg.extra_body.insert("top_p".to_string(), json!(0.8));
        let (handler, _) = handler(cfg, Vec::new());
        let request = handler.build_request(&[ChatMessage::user("hi")], &[], true);
        assert_eq!(request.extra["enable_thinking"], false);
        assert_eq!(request.extra["top_p"], 0.8);
    }

    #[test]
    fn fc_suffix_kept_unless_stripping() {
        let mut cfg = config(BackendProfile::OpenAi);
        cfg.model = "model-FC".to_string();
        assert_eq!(cfg.served_model_name(), "model-FC");
        cfg.strip_fc_suffix = true;
        assert_eq!(cfg.served_model_name(), "model");
    }

    #[test]
    fn capabilities_select_detection() {
        let (handler, _) = handler(config(BackendProfile::LlamaFactory), Vec::new());
        let detection = handler.normalizer().detection();
        assert_eq!(detection, Detection::from(&handler.config().capabilities));
        assert!(detection.native_tool_calls);
        assert!(!detection.native_reasoning);
        assert!(detection.tagged_reasoning);
    }

    #[tokio::test]
    async fn llama_factory_keeps_server_sent_reasoning() {
        let reply = ChatCompletion::from_message(CompletionMessage {
            content: Some("The answer is 4.".to_string()),
            reasoning_content: Some("native thought".to_string()),
            ..Default::default()
        });
        let (handler, _) = handler(
            config(BackendProfile::LlamaFactory),
            vec![Ok(RawResponse::Structured(reply))],
        );
        let mut transcript = Transcript::new();
        transcript.push_user("2 + 2?").unwrap();

        let outcome = handler.query(&transcript, &[], true).await.unwrap();
        assert_eq!(outcome.result.reasoning_content.as_deref(), Some("native thought"));
        assert_eq!(outcome.result.text(), Some("The answer is 4."));
    }

    #[test]
    fn invalid_base_url_is_a_config_error() {
        let cfg = HandlerConfig::new("::nope::", "", "m", BackendProfile::OpenAi);
        assert!(matches!(Handler::new(cfg), Err(HarnessError::Config(_))));
    }

    #[tokio::test]
    async fn step_appends_normalized_turn() {
        let reply = ChatCompletion::from_message(CompletionMessage {
            content: Some("<think>need weather</think>".to_string()),
            tool_calls: Some(vec![RawToolCall::new(
                Some("call_1"),
                "get_weather",
                r#"{"city":"NYC"}"#,
            )]),
            ..Default::default()
        })
        .with_usage(20, 8);
        let (handler, transport) = handler(
            config(BackendProfile::LlamaFactory),
            vec![Ok(RawResponse::Structured(reply))],
        );
        let mut transcript = Transcript::with_system_prompt("sys");
        transcript.push_user("Weather in NYC?").unwrap();

        let outcome = handler
            .step(&mut transcript, &[weather_tool()], true)
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.result.tool_call_ids, vec!["call_1"]);
        assert_eq!(outcome.result.reasoning_content.as_deref(), Some("need weather"));
        assert_eq!((outcome.result.input_token, outcome.result.output_token), (20, 8));
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript.pending_call_ids(), ["call_1"]);

        let sent = transport.requests.lock().unwrap();
        assert_eq!(sent[0].messages.len(), 2);
        assert_eq!(sent[0].extra["enable_thinking"], true);
    }

    #[tokio::test]
    async fn step_refuses_while_calls_outstanding() {
        let (handler, transport) = handler(config(BackendProfile::OpenAi), Vec::new());
        let mut transcript = Transcript::new();
        transcript.push_user("go").unwrap();
        let result = crate::normalizer::normalize(
            &RawResponse::Text("<tool_call>{\"name\": \"f\"}</tool_call>".to_string()),
            true,
        );
        transcript.append_assistant(&result).unwrap();

        let err = handler.step(&mut transcript, &[], true).await.unwrap_err();
        assert!(matches!(err, HarnessError::TranscriptInvariant(_)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn transport_errors_propagate() {
        let (handler, _) = handler(
            config(BackendProfile::OpenAi),
            vec![Err(TransportError::Status {
                status: 500,
                body: "boom".to_string(),
            })],
        );
        let mut transcript = Transcript::new();
        transcript.push_user("go").unwrap();
        let err = handler.step(&mut transcript, &[], true).await.unwrap_err();
        assert!(matches!(err, HarnessError::Transport(_)));
        assert_eq!(transcript.len(), 1);
    }
}
