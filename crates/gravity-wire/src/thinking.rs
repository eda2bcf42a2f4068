//! Thinking-block hygiene for assistant history.
//!
//! The upstream rejects conversations whose past reasoning is unsigned, out
//! of order, or mangled by the client. Before converting an assistant
//! message these passes run in sequence: [`restore_signatures`],
//! [`remove_trailing_unsigned`], [`reorder`].

use serde_json::Value;
use tracing::debug;

use crate::blocks::{ContentBlock, Message, MessageContent, Role};
use crate::model::ModelFamily;
use crate::signature::signature_is_valid;

/// Keep only thinking blocks whose signature the target family accepts, and
/// strip them down to the three fields the upstream understands. Other block
/// kinds pass through untouched.
pub fn restore_signatures(blocks: Vec<ContentBlock>, family: ModelFamily) -> Vec<ContentBlock> {
    blocks
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Thinking { thinking, signature } => {
                if signature_is_valid(&signature, family) {
                    Some(ContentBlock::Thinking { thinking, signature })
                } else {
                    None
                }
            }
            other => Some(other),
        })
        .collect()
}

/// Drop unsigned thinking blocks from the tail of an assistant message.
/// Stops at the first non-thinking block or the first signed one.
pub fn remove_trailing_unsigned(blocks: Vec<ContentBlock>, family: ModelFamily) -> Vec<ContentBlock> {
    let mut blocks = blocks;
    while let Some(last) = blocks.last() {
        match last {
            ContentBlock::Thinking { signature, .. }
                if !signature_is_valid(signature, family) =>
            {
                blocks.pop();
            }
            _ => break,
        }
    }
    blocks
}

/// Partition an assistant message into thinking, then text, then tool_use,
/// preserving relative order within each bucket. Empty-after-trim text
/// blocks are dropped. The upstream requires this block order.
pub fn reorder(blocks: Vec<ContentBlock>) -> Vec<ContentBlock> {
    let mut thinking = Vec::new();
    let mut text = Vec::new();
    let mut tool_use = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {
                thinking.push(block)
            }
            ContentBlock::Text { ref text } if text.trim().is_empty() => {}
            ContentBlock::ToolUse { .. } => tool_use.push(block),
            other => text.push(other),
        }
    }

    thinking.extend(text);
    thinking.extend(tool_use);
    thinking
}

/// Defense in depth on the vendor side: remove thought parts that lack a
/// valid signature from an already-converted parts array.
pub fn filter_unsigned_parts(parts: &mut Vec<Value>, family: ModelFamily) {
    parts.retain(|part| {
        let is_thought = part
            .get("thought")
            .and_then(|t| t.as_bool())
            .unwrap_or(false);
        if !is_thought {
            return true;
        }
        part.get("thoughtSignature")
            .and_then(|s| s.as_str())
            .map(|s| signature_is_valid(s, family))
            .unwrap_or(false)
    });
}

// ── Conversation-state analysis ──────────────────────────────────────────────
// Diagnostic only. History is never rewritten based on these; the old
// "close tool loop" rewrite produced mimicry and stays removed.

fn last_assistant(messages: &[Message]) -> Option<(usize, &Message)> {
    messages
        .iter()
        .enumerate()
        .rev()
        .find(|(_, m)| m.role == Role::Assistant)
}

fn has_tool_use(content: &MessageContent) -> bool {
    content
        .blocks()
        .iter()
        .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
}

fn has_tool_result(content: &MessageContent) -> bool {
    content
        .blocks()
        .iter()
        .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
}

/// The last assistant turn called a tool and a result has already arrived.
pub fn in_tool_loop(messages: &[Message]) -> bool {
    match last_assistant(messages) {
        Some((idx, m)) if has_tool_use(&m.content) => messages[idx + 1..]
            .iter()
            .any(|m| has_tool_result(&m.content)),
        _ => false,
    }
}

/// The last assistant turn called a tool, no result ever arrived, and the
/// user has since said something else — the client abandoned the call.
pub fn interrupted_tool(messages: &[Message]) -> bool {
    match last_assistant(messages) {
        Some((idx, m)) if has_tool_use(&m.content) => {
            let rest = &messages[idx + 1..];
            let any_result = rest.iter().any(|m| has_tool_result(&m.content));
            let plain_user = rest.iter().any(|m| {
                m.role == Role::User
                    && !has_tool_result(&m.content)
                    && !m.content.joined_text().trim().is_empty()
            });
            !any_result && plain_user
        }
        _ => false,
    }
}

/// The last assistant turn carries at least one validly signed thinking block.
pub fn turn_has_valid_thinking(messages: &[Message], family: ModelFamily) -> bool {
    match last_assistant(messages) {
        Some((_, m)) => m.content.blocks().iter().any(|b| match b {
            ContentBlock::Thinking { signature, .. } => signature_is_valid(signature, family),
            _ => false,
        }),
        None => false,
    }
}

/// Log the conversation state once per request for troubleshooting stuck
/// tool loops. Purely observational.
pub fn log_conversation_state(messages: &[Message], family: ModelFamily) {
    debug!(
        in_tool_loop = in_tool_loop(messages),
        interrupted_tool = interrupted_tool(messages),
        has_valid_thinking = turn_has_valid_thinking(messages, family),
        "conversation state"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blocks(v: serde_json::Value) -> Vec<ContentBlock> {
        serde_json::from_value(v).unwrap()
    }

    fn long_sig() -> String {
        "x".repeat(50)
    }

    #[test]
    fn restore_drops_unsigned_thinking() {
        let input = blocks(json!([
            {"type": "thinking", "thinking": "a", "signature": ""},
            {"type": "text", "text": "keep me"}
        ]));
        let out = restore_signatures(input, ModelFamily::Claude);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], ContentBlock::Text { .. }));
    }

    #[test]
    fn restore_keeps_gemini_placeholder() {
        let input = blocks(json!([
            {"type": "thinking", "thinking": "a", "signature": "gemini-skip-signature-validation"}
        ]));
        assert_eq!(restore_signatures(input.clone(), ModelFamily::Gemini).len(), 1);
        assert_eq!(restore_signatures(input, ModelFamily::Claude).len(), 0);
    }

    #[test]
    fn trailing_unsigned_removed_only_from_tail() {
        let sig = long_sig();
        let input = blocks(json!([
            {"type": "text", "text": "x"},
            {"type": "thinking", "thinking": "y", "signature": sig}
        ]));
        // signed tail is untouched
        let out = remove_trailing_unsigned(input.clone(), ModelFamily::Claude);
        assert_eq!(out.len(), 2);

        let input = blocks(json!([
            {"type": "text", "text": "x"},
            {"type": "thinking", "thinking": "y", "signature": ""},
            {"type": "thinking", "thinking": "z", "signature": ""}
        ]));
        let out = remove_trailing_unsigned(input, ModelFamily::Claude);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], ContentBlock::Text { .. }));
    }

    #[test]
    fn reorder_buckets_and_drops_empty_text() {
        let sig = long_sig();
        let input = blocks(json!([
            {"type": "text", "text": "  "},
            {"type": "tool_use", "id": "t1", "name": "f", "input": {}},
            {"type": "text", "text": "visible"},
            {"type": "thinking", "thinking": "t", "signature": sig}
        ]));
        let out = reorder(input);
        assert_eq!(out.len(), 3);
        assert!(matches!(out[0], ContentBlock::Thinking { .. }));
        assert!(matches!(out[1], ContentBlock::Text { .. }));
        assert!(matches!(out[2], ContentBlock::ToolUse { .. }));
    }

    #[test]
    fn reorder_is_stable_within_buckets() {
        let input = blocks(json!([
            {"type": "text", "text": "one"},
            {"type": "text", "text": "two"}
        ]));
        let out = reorder(input);
        match (&out[0], &out[1]) {
            (ContentBlock::Text { text: a }, ContentBlock::Text { text: b }) => {
                assert_eq!(a, "one");
                assert_eq!(b, "two");
            }
            _ => panic!("expected two text blocks"),
        }
    }

    #[test]
    fn filter_unsigned_parts_removes_invalid_thoughts() {
        let sig = long_sig();
        let mut parts = vec![
            json!({"text": "thought", "thought": true, "thoughtSignature": sig}),
            json!({"text": "thought", "thought": true, "thoughtSignature": "bad"}),
            json!({"text": "plain"}),
        ];
        filter_unsigned_parts(&mut parts, ModelFamily::Claude);
        assert_eq!(parts.len(), 2);
    }

    fn msg(role: &str, content: serde_json::Value) -> Message {
        serde_json::from_value(json!({"role": role, "content": content})).unwrap()
    }

    #[test]
    fn tool_loop_detection() {
        let messages = vec![
            msg("user", json!("run it")),
            msg(
                "assistant",
                json!([{"type": "tool_use", "id": "t1", "name": "run", "input": {}}]),
            ),
            msg(
                "user",
                json!([{"type": "tool_result", "tool_use_id": "t1", "content": "done"}]),
            ),
        ];
        assert!(in_tool_loop(&messages));
        assert!(!interrupted_tool(&messages));
    }

    #[test]
    fn interrupted_tool_detection() {
        let messages = vec![
            msg(
                "assistant",
                json!([{"type": "tool_use", "id": "t1", "name": "run", "input": {}}]),
            ),
            msg("user", json!("never mind, do something else")),
        ];
        assert!(interrupted_tool(&messages));
        assert!(!in_tool_loop(&messages));
    }

    #[test]
    fn valid_thinking_detection() {
        let sig = long_sig();
        let messages = vec![msg(
            "assistant",
            json!([{"type": "thinking", "thinking": "t", "signature": sig}]),
        )];
        assert!(turn_has_valid_thinking(&messages, ModelFamily::Claude));
        let messages = vec![msg(
            "assistant",
            json!([{"type": "thinking", "thinking": "t", "signature": "nope"}]),
        )];
        assert!(!turn_has_valid_thinking(&messages, ModelFamily::Claude));
    }
}
