// toolbench-cli/src/inputs.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use toolbench_core::{ChatMessage, ToolDefinition};

#[derive(Deserialize)]
#[serde(untagged)]
enum ToolEntry {
    // `{"type": "function", "function": {...}}`, as sent on the wire.
    Wrapped { function: ToolDefinition },
    Bare(ToolDefinition),
}

pub fn parse_messages(content: &str) -> Result<Vec<ChatMessage>> {
    serde_json::from_str(content).context("Messages must be a JSON array of chat messages")
}

/// Accepts bare definitions and OpenAI-style wrapped ones, mixed freely.
pub fn parse_tools(content: &str) -> Result<Vec<ToolDefinition>> {
    let entries: Vec<ToolEntry> =
        serde_json::from_str(content).context("Tools must be a JSON array of tool definitions")?;
    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            ToolEntry::Wrapped { function } => function,
            ToolEntry::Bare(definition) => definition,
        })
        .collect())
}

pub fn load_messages(path: &Path) -> Result<Vec<ChatMessage>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read messages file {:?}", path))?;
    parse_messages(&content).with_context(|| format!("Invalid messages file {:?}", path))
}

pub fn load_tools(path: Option<&Path>) -> Result<Vec<ToolDefinition>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tools file {:?}", path))?;
    parse_tools(&content).with_context(|| format!("Invalid tools file {:?}", path))
}
