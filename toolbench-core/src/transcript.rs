// toolbench-core/src/transcript.rs
//! The ordered message log of one episode.
//!
//! Roles follow `system? user assistant (tool* assistant)* ...`: an assistant
//! turn that requests calls must be answered by tool turns, one per call id,
//! before anything else is appended. The log is append-only.

use crate::errors::HarnessError;
use crate::models::chat::{ChatMessage, Role};
use crate::models::result::QueryResult;
use tracing::{debug, trace};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    // Outstanding call ids of the latest assistant turn, as a multiset.
    pending: Vec<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(prompt)],
            pending: Vec::new(),
        }
    }

    /// Replays `messages` through the same checks as the append methods.
    pub fn from_messages(messages: Vec<ChatMessage>) -> Result<Self, HarnessError> {
        let mut transcript = Self::new();
        for (position, message) in messages.into_iter().enumerate() {
            trace!(position, role = %message.role, "Replaying message");
            match message.role {
                Role::System => {
                    if position != 0 {
                        return Err(HarnessError::invariant(format!(
                            "system message at position {position}; only the first message may be a system prompt"
                        )));
                    }
                    transcript.messages.push(message);
                }
                Role::User => {
                    transcript.check_user_turn()?;
                    transcript.messages.push(message);
                }
                Role::Assistant => {
                    transcript.check_assistant_turn()?;
                    let ids: Vec<String> = message
                        .tool_calls
                        .iter()
                        .flatten()
                        .map(|call| call.id.clone())
                        .collect();
                    check_exclusive(&message)?;
                    transcript.messages.push(message);
                    transcript.pending = ids;
                }
                Role::Tool => {
                    let Some(id) = message.tool_call_id.clone() else {
                        return Err(HarnessError::invariant(format!(
                            "tool message at position {position} has no tool_call_id"
                        )));
                    };
                    transcript.take_pending(std::slice::from_ref(&id))?;
                    transcript.messages.push(message);
                }
            }
        }
        Ok(transcript)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Call ids of the latest assistant turn that have no result yet.
    pub fn pending_call_ids(&self) -> &[String] {
        &self.pending
    }

    pub fn is_awaiting_tool_results(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> Result<(), HarnessError> {
        self.check_user_turn()?;
        self.messages.push(ChatMessage::user(text));
        Ok(())
    }

    /// Appends the result's assistant message and records its call ids as
    /// outstanding.
    pub fn append_assistant(&mut self, result: &QueryResult) -> Result<(), HarnessError> {
        self.check_assistant_turn()?;
        let message = &result.assistant_message;
        if message.role != Role::Assistant {
            return Err(HarnessError::invariant(format!(
                "assistant_message has role '{}'",
                message.role
            )));
        }
        check_exclusive(message)?;
        let call_count = message.tool_calls.as_ref().map_or(0, Vec::len);
        if call_count != result.tool_call_ids.len() {
            return Err(HarnessError::invariant(format!(
                "{} tool calls but {} tool call ids",
                call_count,
                result.tool_call_ids.len()
            )));
        }

        debug!(tool_calls = call_count, "Appending assistant turn");
        self.messages.push(message.clone());
        self.pending = result.tool_call_ids.clone();
        Ok(())
    }

    /// Appends one tool turn per `(call_id, result_text)` pair, in order.
    ///
    /// Every id must match an outstanding call; otherwise nothing is appended.
    pub fn append_tool_results<I, K, V>(&mut self, results: I) -> Result<(), HarnessError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let results: Vec<(String, String)> = results
            .into_iter()
            .map(|(id, text)| (id.into(), text.into()))
            .collect();
        let ids: Vec<String> = results.iter().map(|(id, _)| id.clone()).collect();
        self.take_pending(&ids)?;

        for (id, text) in results {
            debug!(tool_call_id = %id, "Appending tool result");
            self.messages.push(ChatMessage::tool(id, text));
        }
        Ok(())
    }

    // Removes `ids` from the outstanding set, all or nothing.
    fn take_pending(&mut self, ids: &[String]) -> Result<(), HarnessError> {
        let mut remaining = self.pending.clone();
        for id in ids {
            match remaining.iter().position(|pending| pending == id) {
                Some(index) => {
                    remaining.remove(index);
                }
                None => {
                    return Err(HarnessError::invariant(format!(
                        "tool result for '{id}' does not match an outstanding call (outstanding: {:?})",
                        self.pending
                    )));
                }
            }
        }
        self.pending = remaining;
        Ok(())
    }

    fn check_user_turn(&self) -> Result<(), HarnessError> {
        if self.is_awaiting_tool_results() {
            return Err(HarnessError::invariant(format!(
                "user turn while tool calls are outstanding: {:?}",
                self.pending
            )));
        }
        if self.last().is_some_and(|message| message.role == Role::User) {
            return Err(HarnessError::invariant("two consecutive user turns"));
        }
        Ok(())
    }

    fn check_assistant_turn(&self) -> Result<(), HarnessError> {
        if self.is_awaiting_tool_results() {
            return Err(HarnessError::invariant(format!(
                "assistant turn while tool calls are outstanding: {:?}",
                self.pending
            )));
        }
        match self.last().map(|message| message.role) {
            Some(Role::User) | Some(Role::Tool) => Ok(()),
            Some(Role::Assistant) => Err(HarnessError::invariant(
                "assistant turn directly after another assistant turn",
            )),
            Some(Role::System) | None => Err(HarnessError::invariant(
                "assistant turn before any user turn",
            )),
        }
    }
}

fn check_exclusive(message: &ChatMessage) -> Result<(), HarnessError> {
    if message.has_tool_calls() && message.content.as_deref().is_some_and(|text| !text.is_empty()) {
        return Err(HarnessError::invariant(
            "assistant message carries both content and tool calls",
        ));
    }
    Ok(())
}
