// toolbench-core/src/models/chat.rs
use super::tools::{ToolCall, ToolSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Author of a transcript message.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    #[default]
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(name)
    }
}

/// Represents a message in the transcript sent to the model.
/// Can represent system, user, assistant, or tool messages.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reasoning_content: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// A tool-execution result correlated to `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_call_id: Some(tool_call_id.into()),
            ..Default::default()
        }
    }

    /// True when this message carries at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }
}

/// Body of an OpenAI-compatible `/chat/completions` request.
///
/// `extra` is flattened into the top level, which is where OpenAI-compatible
/// servers expect vendor options such as `enable_thinking`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    pub fn is_streaming(&self) -> bool {
        self.stream == Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tools::ToolFunction;
    use serde_json::json;

    #[test]
    fn assistant_tool_call_message_omits_content() {
        let message = ChatMessage {
            role: Role::Assistant,
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: "call_1".to_string(),
                call_type: "function".to_string(),
                function: ToolFunction {
                    name: "get_weather".to_string(),
                    arguments: r#"{"city":"NYC"}"#.to_string(),
                },
            }]),
            ..Default::default()
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "assistant",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": { "name": "get_weather", "arguments": "{\"city\":\"NYC\"}" }
                }]
            })
        );
        assert!(message.has_tool_calls());
    }

    #[test]
    fn tool_message_carries_call_id() {
        let value = serde_json::to_value(ChatMessage::tool("get_weather", "sunny")).unwrap();
        assert_eq!(
            value,
            json!({ "role": "tool", "content": "sunny", "tool_call_id": "get_weather" })
        );
    }

    #[test]
    fn request_flattens_extra_options() {
        let mut extra = Map::new();
        extra.insert("enable_thinking".to_string(), json!(true));
        let request = ChatRequest {
            model: "qwen".to_string(),
            messages: vec![ChatMessage::user("hi")],
            temperature: Some(0.6),
            tools: None,
            stream: None,
            extra,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["enable_thinking"], true);
        assert_eq!(value["temperature"], 0.6);
        assert!(value.get("tools").is_none());
        assert!(value.get("stream").is_none());
        assert!(!request.is_streaming());
    }
}
