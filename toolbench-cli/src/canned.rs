// toolbench-cli/src/canned.rs
//! Replays recorded tool outputs for scripted episodes.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use toolbench_core::{ToolCallIntent, ToolExecutor};
use tracing::debug;

#[derive(Deserialize)]
#[serde(untagged)]
enum CannedOutput {
    Fixed(String),
    Sequence(Vec<String>),
}

enum Responses {
    Fixed(String),
    Sequence(VecDeque<String>),
}

/// Answers calls by tool name. A fixed output is returned every time; a list
/// is consumed one entry per call.
pub struct CannedToolExecutor {
    responses: Mutex<HashMap<String, Responses>>,
}

impl CannedToolExecutor {
    pub fn empty() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: HashMap<String, CannedOutput> = serde_json::from_str(content)
            .context("Canned outputs must be a JSON object of tool name to output")?;
        let responses = raw
            .into_iter()
            .map(|(name, output)| {
                let responses = match output {
                    CannedOutput::Fixed(text) => Responses::Fixed(text),
                    CannedOutput::Sequence(list) => Responses::Sequence(list.into()),
                };
                (name, responses)
            })
            .collect();
        Ok(Self {
            responses: Mutex::new(responses),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read canned outputs {:?}", path))?;
        Self::from_json_str(&content).with_context(|| format!("Invalid canned outputs {:?}", path))
    }
}

#[async_trait]
impl ToolExecutor for CannedToolExecutor {
    async fn execute(&self, call: &ToolCallIntent) -> Result<String> {
        debug!(
            tool_name = %call.name,
            tool_call_id = %call.call_id,
            "Answering from canned outputs"
        );
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| anyhow!("canned output table is poisoned"))?;
        match responses.get_mut(&call.name) {
            Some(Responses::Fixed(text)) => Ok(text.clone()),
            Some(Responses::Sequence(queue)) => queue
                .pop_front()
                .ok_or_else(|| anyhow!("no canned outputs left for tool '{}'", call.name)),
            None => Err(anyhow!("no canned output for tool '{}'", call.name)),
        }
    }
}
