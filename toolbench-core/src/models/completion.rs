// toolbench-core/src/models/completion.rs
//! Response side of the OpenAI-compatible wire format.
//!
//! Every field is optional so that surprising payloads still deserialize and
//! reach the normalizer, which decides what is usable.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

/// Whatever the transport got back for one model call.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResponse {
    /// A typed completion object.
    Structured(ChatCompletion),
    /// A bare text payload that may embed tagged reasoning or tool-call blocks.
    Text(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_to_default")]
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatCompletion {
    /// Completion with a single assistant message, used by tests and fakes.
    pub fn from_message(message: CompletionMessage) -> Self {
        Self {
            id: None,
            choices: vec![CompletionChoice {
                index: 0,
                message: Some(message),
                finish_reason: None,
            }],
            usage: None,
        }
    }

    pub fn with_usage(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.usage = Some(Usage {
            prompt_tokens,
            completion_tokens,
        });
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CompletionChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub message: Option<CompletionMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Usage {
    #[serde(default, deserialize_with = "null_to_default")]
    pub prompt_tokens: u64,
    #[serde(default, deserialize_with = "null_to_default")]
    pub completion_tokens: u64,
}

/// Assistant message as returned by the backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CompletionMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// Some servers (vLLM, OpenRouter) name the reasoning field `reasoning`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<RawToolCall>>,
}

impl CompletionMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            role: Some("assistant".to_string()),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Structured reasoning, preferring `reasoning_content` over `reasoning`.
    /// Blank values count as absent.
    pub fn reasoning(&self) -> Option<&str> {
        [&self.reasoning_content, &self.reasoning]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|text| !text.trim().is_empty())
    }
}

/// A native tool call before validation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RawToolCall {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub call_type: Option<String>,
    #[serde(default)]
    pub function: Option<RawToolFunction>,
    /// Present on streamed deltas only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

impl RawToolCall {
    pub fn new(id: Option<&str>, name: &str, arguments: &str) -> Self {
        Self {
            id: id.map(str::to_string),
            call_type: Some("function".to_string()),
            function: Some(RawToolFunction {
                name: Some(name.to_string()),
                arguments: Some(JsonValue::String(arguments.to_string())),
            }),
            index: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RawToolFunction {
    #[serde(default)]
    pub name: Option<String>,
    /// Usually a JSON-encoded string, but some servers send an object.
    #[serde(default)]
    pub arguments: Option<JsonValue>,
}

fn null_to_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
