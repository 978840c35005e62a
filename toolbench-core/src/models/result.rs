// toolbench-core/src/models/result.rs
use super::chat::ChatMessage;
use super::tools::{ToolArguments, ToolCallIntent};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use thiserror::Error;

/// One requested call in scoring form. Serializes as `{name: arguments}`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: ToolArguments,
}

impl Serialize for FunctionCall {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.name, &self.arguments)?;
        map.end()
    }
}

/// Why a result could not be decoded into call form for scoring.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("model did not return a list of function calls: {0:?}")]
    NotCalls(String),
    #[error("arguments of '{name}' are not a JSON object: {source}")]
    Arguments {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FunctionCall {
    fn argument_object(&self) -> Result<Map<String, JsonValue>, DecodeError> {
        self.arguments
            .to_object()
            .map_err(|source| DecodeError::Arguments {
                name: self.name.clone(),
                source,
            })
    }

    /// Python call syntax, e.g. `get_weather(city='NYC', days=3)`.
    pub fn to_execute_string(&self) -> Result<String, DecodeError> {
        let arguments = self.argument_object()?;
        let mut out = String::with_capacity(self.name.len() + 2);
        out.push_str(&self.name);
        out.push('(');
        for (position, (key, value)) in arguments.iter().enumerate() {
            if position > 0 {
                out.push_str(", ");
            }
            out.push_str(key);
            out.push('=');
            push_python_literal(&mut out, value);
        }
        out.push(')');
        Ok(out)
    }
}

// Renders JSON the way Python's `repr` renders the equivalent value.
fn push_python_literal(out: &mut String, value: &JsonValue) {
    match value {
        JsonValue::Null => out.push_str("None"),
        JsonValue::Bool(true) => out.push_str("True"),
        JsonValue::Bool(false) => out.push_str("False"),
        JsonValue::Number(number) => out.push_str(&number.to_string()),
        JsonValue::String(text) => push_python_string(out, text),
        JsonValue::Array(items) => {
            out.push('[');
            for (position, item) in items.iter().enumerate() {
                if position > 0 {
                    out.push_str(", ");
                }
                push_python_literal(out, item);
            }
            out.push(']');
        }
        JsonValue::Object(map) => {
            out.push('{');
            for (position, (key, item)) in map.iter().enumerate() {
                if position > 0 {
                    out.push_str(", ");
                }
                push_python_string(out, key);
                out.push_str(": ");
                push_python_literal(out, item);
            }
            out.push('}');
        }
    }
}

fn push_python_string(out: &mut String, text: &str) {
    let quote = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

/// What the model answered: plain text or a list of calls.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ModelResponses {
    Text(String),
    Calls(Vec<FunctionCall>),
}

impl Default for ModelResponses {
    fn default() -> Self {
        ModelResponses::Text(String::new())
    }
}

/// Why a response could not be used.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    /// The completion carried no choices.
    NoChoices,
    /// The first choice had no message.
    MissingMessage,
    /// Nothing usable: no text, no tool calls, no reasoning.
    EmptyPayload,
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DegradedReason::NoChoices => "response has no choices",
            DegradedReason::MissingMessage => "first choice has no message",
            DegradedReason::EmptyPayload => "response payload is empty",
        };
        f.write_str(reason)
    }
}

/// Canonical record of one model call.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub model_responses: ModelResponses,
    /// The exact message to append to the transcript.
    pub assistant_message: ChatMessage,
    pub tool_call_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    pub input_token: u64,
    pub output_token: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<DegradedReason>,
    #[serde(skip_serializing_if = "is_zero")]
    pub dropped_tool_call_blocks: usize,
}

fn is_zero(count: &usize) -> bool {
    *count == 0
}

impl QueryResult {
    /// Empty result returned when the payload was unusable.
    pub fn degraded(reason: DegradedReason) -> Self {
        Self {
            model_responses: ModelResponses::default(),
            assistant_message: ChatMessage {
                role: super::chat::Role::Assistant,
                content: Some(String::new()),
                ..Default::default()
            },
            tool_call_ids: Vec::new(),
            reasoning_content: None,
            input_token: 0,
            output_token: 0,
            degraded: Some(reason),
            dropped_tool_call_blocks: 0,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    pub fn has_tool_calls(&self) -> bool {
        matches!(&self.model_responses, ModelResponses::Calls(calls) if !calls.is_empty())
    }

    /// Text answer, if the model did not request calls.
    pub fn text(&self) -> Option<&str> {
        match &self.model_responses {
            ModelResponses::Text(text) => Some(text.as_str()),
            ModelResponses::Calls(_) => None,
        }
    }

    fn calls(&self) -> Result<&[FunctionCall], DecodeError> {
        match &self.model_responses {
            ModelResponses::Calls(calls) if !calls.is_empty() => Ok(calls.as_slice()),
            ModelResponses::Calls(_) => Err(DecodeError::NotCalls(String::new())),
            ModelResponses::Text(text) => Err(DecodeError::NotCalls(text.clone())),
        }
    }

    /// Scoring form: `[{name: {argument: value}}]`, arguments parsed into
    /// objects.
    pub fn decode_ast(&self) -> Result<Vec<JsonValue>, DecodeError> {
        self.calls()?
            .iter()
            .map(|call| -> Result<JsonValue, DecodeError> {
                let mut entry = Map::new();
                entry.insert(call.name.clone(), JsonValue::Object(call.argument_object()?));
                Ok(JsonValue::Object(entry))
            })
            .collect()
    }

    /// Executable form: one `name(key=value, ...)` string per call.
    pub fn decode_execute(&self) -> Result<Vec<String>, DecodeError> {
        self.calls()?
            .iter()
            .map(FunctionCall::to_execute_string)
            .collect()
    }

    /// Calls paired with their ids, in order.
    pub fn tool_call_intents(&self) -> Vec<ToolCallIntent> {
        match &self.model_responses {
            ModelResponses::Text(_) => Vec::new(),
            ModelResponses::Calls(calls) => calls
                .iter()
                .zip(&self.tool_call_ids)
                .map(|(call, id)| ToolCallIntent {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    call_id: id.clone(),
                })
                .collect(),
        }
    }
}
