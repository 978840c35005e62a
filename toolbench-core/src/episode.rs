// toolbench-core/src/episode.rs
//! Reference episode loop: query, run requested tools, feed results back,
//! until the model answers without calls or the step limit is reached.

use crate::errors::HarnessError;
use crate::handler::Handler;
use crate::models::result::QueryResult;
use crate::models::tools::{ToolArguments, ToolCallIntent, ToolDefinition};
use crate::transcript::Transcript;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_STEPS: usize = 20;

/// Runs one requested function and returns its output text.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCallIntent) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Success,
    Failure,
}

/// One executed call as recorded by the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: ToolArguments,
    /// The tool's output, or `Error: ...` when it failed.
    pub output: String,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone)]
pub struct EpisodeOutcome {
    pub episode_id: Uuid,
    pub transcript: Transcript,
    /// Result of the last model call, if any was made.
    pub last_result: Option<QueryResult>,
    pub executions: Vec<ToolExecution>,
    pub steps: usize,
    pub hit_step_limit: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Sum of model-call latencies; tool execution time is excluded.
    pub latency: Duration,
}

impl EpisodeOutcome {
    /// The model's closing text answer, when the episode ended on one.
    pub fn final_response(&self) -> Option<&str> {
        self.last_result
            .as_ref()
            .filter(|result| !result.has_tool_calls())
            .and_then(QueryResult::text)
    }
}

/// Drives `transcript` in function-calling mode.
///
/// Executor failures become `Error: ...` results so the model can react;
/// transport and transcript errors end the episode.
pub async fn run_episode(
    handler: &Handler,
    mut transcript: Transcript,
    tools: &[ToolDefinition],
    executor: &dyn ToolExecutor,
    max_steps: usize,
) -> Result<EpisodeOutcome, HarnessError> {
    let episode_id = Uuid::new_v4();
    info!(%episode_id, max_steps, tools = tools.len(), "Starting episode");

    let mut outcome = EpisodeOutcome {
        episode_id,
        transcript: Transcript::new(),
        last_result: None,
        executions: Vec::new(),
        steps: 0,
        hit_step_limit: false,
        input_tokens: 0,
        output_tokens: 0,
        latency: Duration::ZERO,
    };

    loop {
        if outcome.steps >= max_steps {
            warn!(%episode_id, limit = max_steps, "Episode reached step limit");
            outcome.hit_step_limit = true;
            break;
        }
        outcome.steps += 1;
        debug!(%episode_id, step = outcome.steps, "Starting episode step");

        let step = handler.step(&mut transcript, tools, true).await?;
        outcome.input_tokens += step.result.input_token;
        outcome.output_tokens += step.result.output_token;
        outcome.latency += step.latency;

        let intents = step.result.tool_call_intents();
        outcome.last_result = Some(step.result);
        if intents.is_empty() {
            break;
        }

        let mut results = Vec::with_capacity(intents.len());
        for intent in intents {
            let execution = execute(executor, intent).await;
            results.push((execution.tool_call_id.clone(), execution.output.clone()));
            outcome.executions.push(execution);
        }
        transcript.append_tool_results(results)?;
    }

    info!(
        %episode_id,
        steps = outcome.steps,
        tool_calls = outcome.executions.len(),
        hit_step_limit = outcome.hit_step_limit,
        "Episode finished"
    );
    outcome.transcript = transcript;
    Ok(outcome)
}

async fn execute(executor: &dyn ToolExecutor, intent: ToolCallIntent) -> ToolExecution {
    debug!(tool_name = %intent.name, tool_call_id = %intent.call_id, "Executing tool");
    let (output, status) = match executor.execute(&intent).await {
        Ok(output) => (output, ExecutionStatus::Success),
        Err(e) => {
            warn!(tool_name = %intent.name, error = %e, "Tool execution failed");
            (format!("Error: {e}"), ExecutionStatus::Failure)
        }
    };
    ToolExecution {
        tool_call_id: intent.call_id,
        tool_name: intent.name,
        arguments: intent.arguments,
        output,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{BackendProfile, HandlerConfig};
    use crate::invoker::tests::ScriptedTransport;
    use crate::models::chat::Role;
    use crate::models::completion::{ChatCompletion, CompletionMessage, RawResponse, RawToolCall};
    use anyhow::anyhow;
    use std::sync::Arc;

    struct Weather;

    #[async_trait]
    impl ToolExecutor for Weather {
        async fn execute(&self, call: &ToolCallIntent) -> anyhow::Result<String> {
            match call.name.as_str() {
                "get_weather" => {
                    let args = call.arguments.to_object()?;
                    Ok(format!("sunny in {}", args["city"].as_str().unwrap_or("?")))
                }
                other => Err(anyhow!("unknown tool '{other}'")),
            }
        }
    }

    fn tool_reply(
        calls: Vec<RawToolCall>,
    ) -> Result<RawResponse, crate::transport::TransportError> {
        Ok(RawResponse::Structured(
            ChatCompletion::from_message(CompletionMessage {
                tool_calls: Some(calls),
                ..Default::default()
            })
            .with_usage(10, 2),
        ))
    }

    fn text_reply(text: &str) -> Result<RawResponse, crate::transport::TransportError> {
        Ok(RawResponse::Structured(
            ChatCompletion::from_message(CompletionMessage::text(text)).with_usage(15, 4),
        ))
    }

    fn handler(script: Vec<Result<RawResponse, crate::transport::TransportError>>) -> Handler {
        let config =
            HandlerConfig::new("http://localhost:8000/v1", "", "m", BackendProfile::OpenAi);
        Handler::with_transport(config, ScriptedTransport::new(script))
    }

    fn seeded() -> Transcript {
        let mut transcript = Transcript::with_system_prompt("sys");
        transcript.push_user("Weather in NYC and a mystery?").unwrap();
        transcript
    }

    #[tokio::test]
    async fn runs_tools_until_text_answer() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let handler = handler(vec![
            tool_reply(vec![
                RawToolCall::new(Some("call_1"), "get_weather", r#"{"city":"NYC"}"#),
                RawToolCall::new(Some("call_2"), "mystery", "{}"),
            ]),
            text_reply("Sunny in NYC."),
        ]);

        let outcome = run_episode(&handler, seeded(), &[], &Weather, DEFAULT_MAX_STEPS)
            .await
            .unwrap();

        assert_eq!(outcome.steps, 2);
        assert!(!outcome.hit_step_limit);
        assert_eq!(outcome.final_response(), Some("Sunny in NYC."));
        assert_eq!((outcome.input_tokens, outcome.output_tokens), (25, 6));

        assert_eq!(outcome.executions.len(), 2);
        assert_eq!(outcome.executions[0].output, "sunny in NYC");
        assert_eq!(outcome.executions[0].status, ExecutionStatus::Success);
        assert_eq!(outcome.executions[1].status, ExecutionStatus::Failure);
        assert!(outcome.executions[1].output.starts_with("Error: unknown tool"));

        let roles: Vec<Role> = outcome.transcript.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::Tool,
                Role::Tool,
                Role::Assistant
            ]
        );
    }

    #[tokio::test]
    async fn stops_at_step_limit() {
        let call = || RawToolCall::new(None, "get_weather", r#"{"city":"NYC"}"#);
        let handler = handler(vec![tool_reply(vec![call()]), tool_reply(vec![call()])]);

        let outcome = run_episode(&handler, seeded(), &[], &Weather, 2).await.unwrap();

        assert!(outcome.hit_step_limit);
        assert_eq!(outcome.steps, 2);
        assert_eq!(outcome.final_response(), None);
        assert!(!outcome.transcript.is_awaiting_tool_results());
    }

    #[tokio::test]
    async fn transport_failure_ends_episode() {
        let handler = handler(vec![Err(crate::transport::TransportError::Status {
            status: 400,
            body: "bad request".to_string(),
        })]);
        let err = run_episode(&handler, seeded(), &[], &Weather, DEFAULT_MAX_STEPS)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Transport(_)));
    }

    #[test]
    fn executor_is_object_safe() {
        let _executor: Arc<dyn ToolExecutor> = Arc::new(Weather);
    }
}
