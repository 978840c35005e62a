// toolbench-core/src/models/tools.rs
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

// --- Structs for tool calls carried in the transcript ---

/// A tool call as it appears on an assistant message in the transcript.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String, // Usually "function"
    pub function: ToolFunction,
}

fn function_type() -> String {
    "function".to_string()
}

/// The function half of a [`ToolCall`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolFunction {
    pub name: String,
    /// Arguments travel as a JSON-encoded string on the OpenAI wire format.
    pub arguments: String,
}

// --- Tool definitions offered to the model ---

/// Schema for one function the model may call.
///
/// `parameters` is kept as an arbitrary JSON schema: evaluation suites ship
/// their own schemas and we pass them through untouched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub parameters: JsonValue,
}

fn empty_object_schema() -> JsonValue {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Request-side wrapper: `{"type": "function", "function": {...}}`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: ToolDefinition,
}

impl From<&ToolDefinition> for ToolSpec {
    fn from(definition: &ToolDefinition) -> Self {
        Self {
            tool_type: "function",
            function: definition.clone(),
        }
    }
}

// --- Normalized tool-call intents ---

/// Arguments of a requested function call.
///
/// Native tool calls carry the provider's JSON text verbatim; calls decoded
/// from tagged text blocks carry the decoded object.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ToolArguments {
    Raw(String),
    Structured(Map<String, JsonValue>),
}

impl ToolArguments {
    /// JSON text form, as sent back to the model on the next turn.
    pub fn to_json_string(&self) -> String {
        match self {
            ToolArguments::Raw(text) => text.clone(),
            ToolArguments::Structured(map) => JsonValue::Object(map.clone()).to_string(),
        }
    }

    /// Parses the arguments into a JSON object. Raw text that is not a JSON
    /// object is an error.
    pub fn to_object(&self) -> Result<Map<String, JsonValue>, serde_json::Error> {
        match self {
            ToolArguments::Raw(text) => serde_json::from_str(text),
            ToolArguments::Structured(map) => Ok(map.clone()),
        }
    }
}

/// One requested function invocation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolCallIntent {
    pub name: String,
    pub arguments: ToolArguments,
    /// Never empty; falls back to `name` when the provider gives no id.
    pub call_id: String,
}
