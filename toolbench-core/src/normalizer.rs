// toolbench-core/src/normalizer.rs
//! Turns a raw provider response into a [`QueryResult`].
//!
//! Tool calls come from native `tool_calls` first, then from `<tool_call>`
//! blocks in the visible text. Reasoning comes from the structured field
//! first, then from `<think>` blocks. Unusable payloads produce a degraded
//! result instead of an error.

use crate::invoker::Invocation;
use crate::models::chat::{ChatMessage, Role};
use crate::models::completion::{CompletionMessage, RawResponse, RawToolCall, Usage};
use crate::models::result::{DegradedReason, FunctionCall, ModelResponses, QueryResult};
use crate::models::tools::{ToolArguments, ToolCall, ToolCallIntent, ToolFunction};
use crate::tags::{TagExtractor, decode_tool_call_blocks};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

/// Which response shapes the normalizer looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub native_tool_calls: bool,
    pub tagged_tool_calls: bool,
    /// Prefer the structured reasoning field over `<think>` blocks. When
    /// off, the field is still read if no tagged reasoning is found.
    pub native_reasoning: bool,
    /// Look for `<think>` blocks and strip them from the visible text.
    pub tagged_reasoning: bool,
}

impl Default for Detection {
    fn default() -> Self {
        Self {
            native_tool_calls: true,
            tagged_tool_calls: true,
            native_reasoning: true,
            tagged_reasoning: true,
        }
    }
}

/// Anything that carries a [`RawResponse`].
pub trait AsRawResponse {
    fn raw_response(&self) -> &RawResponse;
}

impl AsRawResponse for RawResponse {
    fn raw_response(&self) -> &RawResponse {
        self
    }
}

impl AsRawResponse for Invocation {
    fn raw_response(&self) -> &RawResponse {
        &self.response
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Normalizer {
    detection: Detection,
}

/// Normalizes with every detection path enabled.
pub fn normalize<R: AsRawResponse + ?Sized>(raw: &R, function_calling: bool) -> QueryResult {
    Normalizer::default().normalize(raw, function_calling)
}

// Intermediate view shared by the structured and text paths.
struct Payload<'a> {
    content: Option<&'a str>,
    reasoning: Option<&'a str>,
    tool_calls: &'a [RawToolCall],
    usage: Option<&'a Usage>,
}

impl Normalizer {
    pub fn with_detection(detection: Detection) -> Self {
        Self { detection }
    }

    pub fn detection(&self) -> Detection {
        self.detection
    }

    /// Never fails: structurally unusable input yields a degraded result.
    pub fn normalize<R: AsRawResponse + ?Sized>(
        &self,
        raw: &R,
        function_calling: bool,
    ) -> QueryResult {
        let payload = match raw.raw_response() {
            RawResponse::Text(text) => {
                if text.trim().is_empty() {
                    return degraded(DegradedReason::EmptyPayload);
                }
                Payload {
                    content: Some(text.as_str()),
                    reasoning: None,
                    tool_calls: &[],
                    usage: None,
                }
            }
            RawResponse::Structured(completion) => {
                let Some(choice) = completion.choices.first() else {
                    return degraded(DegradedReason::NoChoices);
                };
                let Some(message) = choice.message.as_ref() else {
                    return degraded(DegradedReason::MissingMessage);
                };
                if is_empty_message(message) {
                    return degraded(DegradedReason::EmptyPayload);
                }
                Payload {
                    content: message.content.as_deref(),
                    reasoning: message.reasoning(),
                    tool_calls: message.tool_calls.as_deref().unwrap_or(&[]),
                    usage: completion.usage.as_ref(),
                }
            }
        };
        self.assemble(payload, function_calling)
    }

    fn assemble(&self, payload: Payload<'_>, function_calling: bool) -> QueryResult {
        let mut visible = payload.content.unwrap_or_default().to_string();

        // `<think>` blocks never reach the visible text, whichever source
        // ends up supplying the reasoning.
        let mut tagged_reasoning = None;
        if self.detection.tagged_reasoning {
            let extraction = TagExtractor::reasoning().extract(&visible);
            if !extraction.is_empty() {
                tagged_reasoning = extraction.joined();
                let cleaned = extraction.cleaned().into_owned();
                visible = cleaned;
            }
        }
        let native_reasoning = payload.reasoning.map(str::to_string);
        let reasoning_content = if self.detection.native_reasoning {
            native_reasoning.or(tagged_reasoning)
        } else {
            tagged_reasoning.or(native_reasoning)
        };

        let mut intents = Vec::new();
        let mut tool_calls = Vec::new();
        let mut dropped_tool_call_blocks = 0;
        if function_calling {
            if self.detection.native_tool_calls {
                (intents, tool_calls) = native_tool_calls(payload.tool_calls);
            }
            if intents.is_empty() && self.detection.tagged_tool_calls {
                let blocks = decode_tool_call_blocks(&TagExtractor::tool_call().extract(&visible));
                dropped_tool_call_blocks = blocks.malformed.len();
                for call in blocks.calls {
                    let arguments = ToolArguments::Structured(call.arguments);
                    tool_calls.push(ToolCall {
                        id: call.name.clone(),
                        call_type: "function".to_string(),
                        function: ToolFunction {
                            name: call.name.clone(),
                            arguments: arguments.to_json_string(),
                        },
                    });
                    intents.push(ToolCallIntent {
                        call_id: call.name.clone(),
                        name: call.name,
                        arguments,
                    });
                }
            }
        }

        let (input_token, output_token) = payload
            .usage
            .map_or((0, 0), |usage| (usage.prompt_tokens, usage.completion_tokens));

        let (model_responses, assistant_message, tool_call_ids) = if intents.is_empty() {
            let message = ChatMessage {
                role: Role::Assistant,
                content: Some(visible.clone()),
                reasoning_content: reasoning_content.clone(),
                ..Default::default()
            };
            (ModelResponses::Text(visible), message, Vec::new())
        } else {
            debug!(count = intents.len(), "Normalized tool calls");
            let message = ChatMessage {
                role: Role::Assistant,
                content: None,
                tool_calls: Some(tool_calls),
                reasoning_content: reasoning_content.clone(),
                ..Default::default()
            };
            let ids: Vec<String> = intents.iter().map(|intent| intent.call_id.clone()).collect();
            let calls = intents
                .into_iter()
                .map(|intent| FunctionCall {
                    name: intent.name,
                    arguments: intent.arguments,
                })
                .collect();
            (ModelResponses::Calls(calls), message, ids)
        };

        QueryResult {
            model_responses,
            assistant_message,
            tool_call_ids,
            reasoning_content,
            input_token,
            output_token,
            degraded: None,
            dropped_tool_call_blocks,
        }
    }
}

fn degraded(reason: DegradedReason) -> QueryResult {
    warn!(%reason, "Degraded model response");
    QueryResult::degraded(reason)
}

fn is_empty_message(message: &CompletionMessage) -> bool {
    let no_content = message
        .content
        .as_deref()
        .is_none_or(|text| text.trim().is_empty());
    let no_calls = message.tool_calls.as_ref().is_none_or(Vec::is_empty);
    no_content && no_calls && message.reasoning().is_none()
}

/// Valid native entries as intents plus the matching transcript calls.
/// Entries without a function name are dropped.
fn native_tool_calls(raw: &[RawToolCall]) -> (Vec<ToolCallIntent>, Vec<ToolCall>) {
    let mut intents = Vec::with_capacity(raw.len());
    let mut calls = Vec::with_capacity(raw.len());
    for (position, entry) in raw.iter().enumerate() {
        let function = entry.function.as_ref();
        let Some(name) = function
            .and_then(|f| f.name.as_deref())
            .filter(|name| !name.trim().is_empty())
        else {
            warn!(position, "Dropping native tool call without a function name");
            continue;
        };
        let arguments = match function.and_then(|f| f.arguments.as_ref()) {
            None | Some(JsonValue::Null) => "{}".to_string(),
            Some(JsonValue::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        };
        let call_id = entry
            .id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(name)
            .to_string();
        calls.push(ToolCall {
            id: call_id.clone(),
            call_type: entry
                .call_type
                .clone()
                .unwrap_or_else(|| "function".to_string()),
            function: ToolFunction {
                name: name.to_string(),
                arguments: arguments.clone(),
            },
        });
        intents.push(ToolCallIntent {
            name: name.to_string(),
            arguments: ToolArguments::Raw(arguments),
            call_id,
        });
    }
    (intents, calls)
}
