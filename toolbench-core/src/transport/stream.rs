// toolbench-core/src/transport/stream.rs
//! Folds a `text/event-stream` chat completion back into one completion.

use super::TransportError;
use crate::models::completion::{
    ChatCompletion, CompletionChoice, CompletionMessage, RawToolCall, RawToolFunction, Usage,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::{trace, warn};

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Option<Vec<StreamChoice>>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    delta: Option<CompletionMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Default)]
struct ChoiceState {
    role: Option<String>,
    content: Option<String>,
    reasoning: String,
    tool_calls: BTreeMap<u32, ToolCallState>,
    finish_reason: Option<String>,
}

#[derive(Default)]
struct ToolCallState {
    id: Option<String>,
    call_type: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Aggregates SSE `data:` lines up to `[DONE]`.
///
/// Content and reasoning deltas are concatenated per choice, tool-call deltas
/// are merged by their `index`, and usage is taken from whichever chunk
/// carries it. Undecodable chunks are skipped with a warning.
pub fn aggregate_sse(body: &str) -> Result<ChatCompletion, TransportError> {
    let mut id = None;
    let mut usage = None;
    let mut choices: BTreeMap<u32, ChoiceState> = BTreeMap::new();
    let mut chunks = 0usize;

    for line in body.lines() {
        let Some(data) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            break;
        }
        if data.is_empty() {
            continue;
        }
        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "Skipping undecodable stream chunk");
                continue;
            }
        };
        chunks += 1;
        trace!(chunk = chunks, "Merging stream chunk");

        if id.is_none() {
            id = chunk.id;
        }
        if chunk.usage.is_some() {
            usage = chunk.usage;
        }
        for choice in chunk.choices.unwrap_or_default() {
            let state = choices.entry(choice.index).or_default();
            if choice.finish_reason.is_some() {
                state.finish_reason = choice.finish_reason;
            }
            if let Some(delta) = choice.delta {
                merge_delta(state, delta);
            }
        }
    }

    if chunks == 0 {
        return Err(TransportError::Body(
            "event stream contained no data chunks".to_string(),
        ));
    }

    Ok(ChatCompletion {
        id,
        choices: choices
            .into_iter()
            .map(|(index, state)| finish_choice(index, state))
            .collect(),
        usage,
    })
}

fn merge_delta(state: &mut ChoiceState, delta: CompletionMessage) {
    if delta.role.is_some() {
        state.role = delta.role;
    }
    if let Some(text) = delta.content {
        state.content.get_or_insert_with(String::new).push_str(&text);
    }
    // Streams use one reasoning field or the other, never both.
    if let Some(text) = delta.reasoning_content.or(delta.reasoning) {
        state.reasoning.push_str(&text);
    }
    for (position, call) in delta.tool_calls.unwrap_or_default().into_iter().enumerate() {
        let key = call.index.unwrap_or(position as u32);
        let entry = state.tool_calls.entry(key).or_default();
        if let Some(id) = call.id.filter(|id| !id.is_empty()) {
            entry.id = Some(id);
        }
        if call.call_type.is_some() {
            entry.call_type = call.call_type;
        }
        if let Some(function) = call.function {
            if entry.name.is_none() {
                entry.name = function.name.filter(|name| !name.is_empty());
            }
            match function.arguments {
                Some(JsonValue::String(fragment)) => entry.arguments.push_str(&fragment),
                Some(JsonValue::Null) | None => {}
                Some(whole) => entry.arguments = whole.to_string(),
            }
        }
    }
}

fn finish_choice(index: u32, state: ChoiceState) -> CompletionChoice {
    let tool_calls: Vec<RawToolCall> = state
        .tool_calls
        .into_iter()
        .map(|(position, call)| RawToolCall {
            id: call.id,
            call_type: call.call_type,
            function: Some(RawToolFunction {
                name: call.name,
                arguments: Some(JsonValue::String(call.arguments)),
            }),
            index: Some(position),
        })
        .collect();

    CompletionChoice {
        index,
        message: Some(CompletionMessage {
            role: state.role.or_else(|| Some("assistant".to_string())),
            content: state.content,
            reasoning_content: Some(state.reasoning).filter(|text| !text.is_empty()),
            reasoning: None,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
        }),
        finish_reason: state.finish_reason,
    }
}
