// toolbench-core/src/tags.rs
//! Extraction of `<tag>…</tag>` segments from model text.
//!
//! Backends that cannot return structured fields embed reasoning in
//! `<think>` blocks and tool calls in `<tool_call>` blocks. Matching is
//! non-greedy and spans newlines; every occurrence is found.

use lazy_static::lazy_static;
use regex::{CaptureMatches, Regex};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::borrow::Cow;
use thiserror::Error;
use tracing::{debug, warn};

pub const REASONING_TAG: &str = "think";
pub const TOOL_CALL_TAG: &str = "tool_call";

lazy_static! {
    static ref REASONING: TagExtractor = TagExtractor::compile(REASONING_TAG);
    static ref TOOL_CALL: TagExtractor = TagExtractor::compile(TOOL_CALL_TAG);
}

/// Matcher for one tag name. The pattern is compiled once per extractor.
#[derive(Debug, Clone)]
pub struct TagExtractor {
    tag: String,
    pattern: Regex,
}

impl TagExtractor {
    pub fn new(tag: &str) -> Result<Self, regex::Error> {
        let escaped = regex::escape(tag);
        let pattern = Regex::new(&format!("(?s)<{escaped}>(.*?)</{escaped}>"))?;
        Ok(Self {
            tag: tag.to_string(),
            pattern,
        })
    }

    // Built-in tag names are plain identifiers, so escaping makes the
    // pattern infallible.
    fn compile(tag: &str) -> Self {
        match Self::new(tag) {
            Ok(extractor) => extractor,
            Err(e) => unreachable!("escaped tag pattern failed to compile: {e}"),
        }
    }

    /// Extractor for `<think>` reasoning blocks.
    pub fn reasoning() -> &'static TagExtractor {
        &REASONING
    }

    /// Extractor for `<tool_call>` blocks.
    pub fn tool_call() -> &'static TagExtractor {
        &TOOL_CALL
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn extract<'e, 't>(&'e self, text: &'t str) -> Extraction<'e, 't> {
        Extraction {
            extractor: self,
            text,
        }
    }
}

/// Lazy view of the matches of one tag in one text.
#[derive(Debug, Clone, Copy)]
pub struct Extraction<'e, 't> {
    extractor: &'e TagExtractor,
    text: &'t str,
}

impl<'e, 't> Extraction<'e, 't> {
    /// Inner texts in source order. Each call starts a fresh scan.
    pub fn matches(&self) -> TagMatches<'e, 't> {
        TagMatches {
            inner: self.extractor.pattern.captures_iter(self.text),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.extractor.pattern.is_match(self.text)
    }

    pub fn count(&self) -> usize {
        self.matches().count()
    }

    /// Input with every matched span removed and nothing else touched.
    pub fn residual(&self) -> Cow<'t, str> {
        self.extractor.pattern.replace_all(self.text, "")
    }

    /// Residual trimmed of surrounding whitespace. Unchanged input when the
    /// tag never occurs.
    pub fn cleaned(&self) -> Cow<'t, str> {
        if self.is_empty() {
            return Cow::Borrowed(self.text);
        }
        Cow::Owned(self.residual().trim().to_string())
    }

    /// Non-blank matches, each trimmed, joined with a blank line.
    pub fn joined(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .matches()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

/// Iterator over the inner text of each match.
pub struct TagMatches<'e, 't> {
    inner: CaptureMatches<'e, 't>,
}

impl<'t> Iterator for TagMatches<'_, 't> {
    type Item = &'t str;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|caps| caps.get(1).map_or("", |inner| inner.as_str()))
    }
}

// --- Tool-call blocks ---

/// A call decoded from a `<tool_call>` block.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedToolCall {
    pub name: String,
    pub arguments: Map<String, JsonValue>,
}

/// A block that did not decode. Logged and skipped, never fatal.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("tool-call block {index} is malformed: {reason}")]
pub struct MalformedToolCallBlock {
    /// Position of the block among all blocks in the text.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallBlocks {
    pub calls: Vec<TaggedToolCall>,
    pub malformed: Vec<MalformedToolCallBlock>,
}

#[derive(Deserialize)]
struct BlockPayload {
    name: String,
    #[serde(default, alias = "parameters")]
    arguments: Option<JsonValue>,
}

/// Decodes every block independently; failures do not affect siblings.
pub fn decode_tool_call_blocks(extraction: &Extraction<'_, '_>) -> ToolCallBlocks {
    let mut blocks = ToolCallBlocks::default();
    for (index, inner) in extraction.matches().enumerate() {
        match decode_block(inner) {
            Ok(call) => {
                debug!(index, tool_name = %call.name, "Decoded tagged tool call");
                blocks.calls.push(call);
            }
            Err(reason) => {
                let malformed = MalformedToolCallBlock { index, reason };
                warn!(index, error = %malformed.reason, "Skipping malformed tool-call block");
                blocks.malformed.push(malformed);
            }
        }
    }
    blocks
}

fn decode_block(inner: &str) -> Result<TaggedToolCall, String> {
    let payload: BlockPayload =
        serde_json::from_str(inner.trim()).map_err(|e| format!("invalid JSON: {e}"))?;
    if payload.name.trim().is_empty() {
        return Err("empty function name".to_string());
    }
    let arguments = match payload.arguments {
        None | Some(JsonValue::Null) => Map::new(),
        Some(JsonValue::Object(map)) => map,
        Some(JsonValue::String(encoded)) => serde_json::from_str(&encoded)
            .map_err(|e| format!("arguments string is not a JSON object: {e}"))?,
        Some(other) => {
            return Err(format!("arguments must be an object, got {other}"));
        }
    };
    Ok(TaggedToolCall {
        name: payload.name,
        arguments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_every_reasoning_block_in_order() {
        let text = "<think>one</think>A<think>\ntwo\nlines\n</think>B<think>three</think>";
        let extraction = TagExtractor::reasoning().extract(text);
        let matches: Vec<&str> = extraction.matches().collect();
        assert_eq!(matches, vec!["one", "\ntwo\nlines\n", "three"]);
        assert_eq!(extraction.count(), 3);
        assert_eq!(extraction.residual(), "AB");
        assert_eq!(
            extraction.joined().as_deref(),
            Some("one\n\ntwo\nlines\n\nthree")
        );
    }

    #[test]
    fn residual_is_byte_exact_outside_spans() {
        let text = "  lead <think>x</think> mid\n\n<think>y</think>tail  ";
        let extraction = TagExtractor::reasoning().extract(text);
        assert_eq!(extraction.residual(), "  lead  mid\n\ntail  ");
        assert_eq!(extraction.cleaned(), "lead  mid\n\ntail");
    }

    #[test]
    fn absent_tag_leaves_input_unchanged() {
        let text = "  plain answer \n";
        let extraction = TagExtractor::reasoning().extract(text);
        assert!(extraction.is_empty());
        assert_eq!(extraction.matches().next(), None);
        assert_eq!(extraction.residual(), text);
        assert_eq!(extraction.cleaned(), text);
        assert_eq!(extraction.joined(), None);
    }

    #[test]
    fn matching_is_non_greedy_and_restartable() {
        let extraction = TagExtractor::reasoning().extract("<think>a</think><think>b</think>");
        assert_eq!(extraction.matches().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(extraction.matches().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn unterminated_block_is_not_a_match() {
        let extraction = TagExtractor::reasoning().extract("<think>never closed");
        assert!(extraction.is_empty());
        assert_eq!(extraction.residual(), "<think>never closed");
    }

    #[test]
    fn blank_reasoning_counts_as_absent() {
        let extraction = TagExtractor::reasoning().extract("<think>\n\n</think>\n\nHello");
        assert_eq!(extraction.joined(), None);
        assert_eq!(extraction.cleaned(), "Hello");
    }

    #[test]
    fn custom_tag_names_are_escaped() {
        let extractor = TagExtractor::new("a.b").unwrap();
        assert_eq!(extractor.tag(), "a.b");
        let extraction = extractor.extract("<a.b>hit</a.b><axb>miss</axb>");
        assert_eq!(extraction.matches().collect::<Vec<_>>(), vec!["hit"]);
    }

    #[test]
    fn decodes_well_formed_blocks_and_skips_malformed() {
        let text = concat!(
            "<tool_call>\n{\"name\": \"get_weather\", \"arguments\": {\"city\": \"NYC\"}}\n</tool_call>\n",
            "<tool_call>\n{\"name\": \"broken\", \"arguments\": \n</tool_call>\n",
            "<tool_call>{\"name\": \"get_time\"}</tool_call>",
        );
        let blocks = decode_tool_call_blocks(&TagExtractor::tool_call().extract(text));
        assert_eq!(blocks.calls.len(), 2);
        assert_eq!(blocks.calls[0].name, "get_weather");
        assert_eq!(blocks.calls[0].arguments["city"], "NYC");
        assert_eq!(blocks.calls[1].name, "get_time");
        assert!(blocks.calls[1].arguments.is_empty());
        assert_eq!(blocks.malformed.len(), 1);
        assert_eq!(blocks.malformed[0].index, 1);
    }

    #[test]
    fn accepts_string_encoded_and_aliased_arguments() {
        assert_eq!(
            decode_block(r#"{"name": "f", "arguments": "{\"x\": 1}"}"#)
                .unwrap()
                .arguments["x"],
            json!(1)
        );
        assert_eq!(
            decode_block(r#"{"name": "f", "parameters": {"y": true}}"#)
                .unwrap()
                .arguments["y"],
            json!(true)
        );
    }

    #[test]
    fn rejects_non_object_arguments_and_missing_names() {
        assert!(decode_block(r#"{"name": "f", "arguments": [1, 2]}"#).is_err());
        assert!(decode_block(r#"{"name": "f", "arguments": "[1]"}"#).is_err());
        assert!(decode_block(r#"{"arguments": {}}"#).is_err());
        assert!(decode_block(r#"{"name": " ", "arguments": {}}"#).is_err());
    }
}
