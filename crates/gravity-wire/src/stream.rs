//! Streaming translation: vendor SSE chunks in, Anthropic events out.
//!
//! [`StreamTranslator`] is a pure transducer with bounded state — current
//! block type, block index, accumulated signature, usage counters. Events
//! come out in exactly the order parts arrive, with the content-block
//! bracket events inserted around type changes.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::warn;

use crate::model::ModelFamily;
use crate::response::{
    map_finish_reason, new_message_id, new_tool_id, Part, UsageMetadata, VendorContent,
    VendorResponse,
};
use crate::signature::{signature_is_valid, SignatureCache};

/// One server-sent event on the Anthropic wire: `event: <name>` + JSON data.
#[derive(Debug, Clone)]
pub struct AnthropicEvent {
    pub name: &'static str,
    pub data: Value,
}

impl AnthropicEvent {
    fn new(name: &'static str, data: Value) -> Self {
        Self { name, data }
    }
}

/// Parse one line of the vendor SSE body. Returns the payload with any
/// outer `response` wrapper removed; `None` for non-data lines and for
/// payloads that fail to parse (logged and skipped, the stream continues).
pub fn parse_vendor_sse_line(line: &str) -> Option<VendorResponse> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    let mut value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(error) => {
            warn!(%error, "skipping unparseable SSE line");
            return None;
        }
    };
    if let Some(inner) = value.get_mut("response") {
        value = inner.take();
    }
    match serde_json::from_value(value) {
        Ok(chunk) => Some(chunk),
        Err(error) => {
            warn!(%error, "skipping malformed vendor chunk");
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Thinking,
    Text,
    ToolUse,
}

pub struct StreamTranslator {
    model: String,
    family: ModelFamily,
    signatures: Arc<SignatureCache>,
    message_id: String,
    started: bool,
    block: Option<BlockKind>,
    block_index: usize,
    /// Longest signature seen for the currently open thinking block.
    pending_signature: String,
    has_tool_use: bool,
    finish_reason: Option<String>,
    usage: UsageMetadata,
}

impl StreamTranslator {
    pub fn new(model: &str, family: ModelFamily, signatures: Arc<SignatureCache>) -> Self {
        Self {
            model: model.to_string(),
            family,
            signatures,
            message_id: new_message_id(),
            started: false,
            block: None,
            block_index: 0,
            pending_signature: String::new(),
            has_tool_use: false,
            finish_reason: None,
            usage: UsageMetadata::default(),
        }
    }

    /// Feed one vendor chunk; returns the Anthropic events it produces.
    pub fn on_chunk(&mut self, chunk: &VendorResponse) -> Vec<AnthropicEvent> {
        let mut events = Vec::new();

        // Usage first: the opening chunk carries the prompt counts that
        // message_start needs.
        if let Some(usage) = chunk.usage_metadata {
            self.usage = usage;
        }

        if let Some(candidate) = chunk.candidates.first() {
            for part in &candidate.content.parts {
                self.on_part(part, &mut events);
            }
            if let Some(reason) = &candidate.finish_reason {
                self.finish_reason = Some(reason.clone());
            }
        }

        events
    }

    /// The upstream stream ended: close the open block, emit the final
    /// usage and stop reason. Synthesizes a minimal empty message when no
    /// part ever arrived.
    pub fn finish(&mut self) -> Vec<AnthropicEvent> {
        let mut events = Vec::new();

        if !self.started {
            self.emit_message_start(&mut events);
            events.push(AnthropicEvent::new(
                "content_block_start",
                json!({
                    "type": "content_block_start",
                    "index": 0,
                    "content_block": {"type": "text", "text": ""},
                }),
            ));
            events.push(AnthropicEvent::new(
                "content_block_stop",
                json!({"type": "content_block_stop", "index": 0}),
            ));
        } else {
            self.close_block(&mut events);
        }

        let stop_reason = map_finish_reason(self.finish_reason.as_deref(), self.has_tool_use);
        events.push(AnthropicEvent::new(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {"stop_reason": stop_reason, "stop_sequence": null},
                "usage": {
                    "output_tokens": self.usage.candidates_token_count,
                    "cache_read_input_tokens": self.usage.cached_content_token_count,
                    "cache_creation_input_tokens": 0,
                },
            }),
        ));
        events.push(AnthropicEvent::new(
            "message_stop",
            json!({"type": "message_stop"}),
        ));
        events
    }

    fn on_part(&mut self, part: &Part, events: &mut Vec<AnthropicEvent>) {
        if let Some(call) = &part.function_call {
            self.emit_message_start(events);
            self.close_block(events);

            let id = call
                .id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(new_tool_id);
            let mut block = json!({
                "type": "tool_use",
                "id": id,
                "name": call.name,
                "input": {},
            });
            if let Some(sig) = part
                .thought_signature
                .as_deref()
                .filter(|s| signature_is_valid(s, self.family))
            {
                block["signature"] = json!(sig);
                self.signatures.put(&id, sig);
            }
            events.push(AnthropicEvent::new(
                "content_block_start",
                json!({
                    "type": "content_block_start",
                    "index": self.block_index,
                    "content_block": block,
                }),
            ));
            events.push(AnthropicEvent::new(
                "content_block_delta",
                json!({
                    "type": "content_block_delta",
                    "index": self.block_index,
                    "delta": {
                        "type": "input_json_delta",
                        "partial_json": call.args.to_string(),
                    },
                }),
            ));
            self.block = Some(BlockKind::ToolUse);
            self.has_tool_use = true;
            return;
        }

        let text = match &part.text {
            Some(text) => text,
            None => return,
        };

        if part.thought {
            self.emit_message_start(events);
            self.open_block(
                BlockKind::Thinking,
                json!({"type": "thinking", "thinking": "", "signature": ""}),
                events,
            );
            events.push(AnthropicEvent::new(
                "content_block_delta",
                json!({
                    "type": "content_block_delta",
                    "index": self.block_index,
                    "delta": {"type": "thinking_delta", "thinking": text},
                }),
            ));
            if let Some(sig) = &part.thought_signature {
                if sig.len() > self.pending_signature.len() {
                    self.pending_signature = sig.clone();
                }
            }
        } else {
            if text.trim().is_empty() {
                return;
            }
            self.emit_message_start(events);
            self.open_block(BlockKind::Text, json!({"type": "text", "text": ""}), events);
            events.push(AnthropicEvent::new(
                "content_block_delta",
                json!({
                    "type": "content_block_delta",
                    "index": self.block_index,
                    "delta": {"type": "text_delta", "text": text},
                }),
            ));
        }
    }

    fn emit_message_start(&mut self, events: &mut Vec<AnthropicEvent>) {
        if self.started {
            return;
        }
        self.started = true;
        let input = self
            .usage
            .prompt_token_count
            .saturating_sub(self.usage.cached_content_token_count);
        events.push(AnthropicEvent::new(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {
                        "input_tokens": input,
                        "output_tokens": 0,
                        "cache_read_input_tokens": self.usage.cached_content_token_count,
                        "cache_creation_input_tokens": 0,
                    },
                },
            }),
        ));
    }

    /// Open a block of `kind` unless one is already open; closing whatever
    /// other block was active first.
    fn open_block(&mut self, kind: BlockKind, start: Value, events: &mut Vec<AnthropicEvent>) {
        if self.block == Some(kind) {
            return;
        }
        self.close_block(events);
        events.push(AnthropicEvent::new(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": self.block_index,
                "content_block": start,
            }),
        ));
        self.block = Some(kind);
    }

    fn close_block(&mut self, events: &mut Vec<AnthropicEvent>) {
        let kind = match self.block.take() {
            Some(kind) => kind,
            None => return,
        };
        if kind == BlockKind::Thinking && !self.pending_signature.is_empty() {
            events.push(AnthropicEvent::new(
                "content_block_delta",
                json!({
                    "type": "content_block_delta",
                    "index": self.block_index,
                    "delta": {
                        "type": "signature_delta",
                        "signature": self.pending_signature,
                    },
                }),
            ));
            self.pending_signature.clear();
        }
        events.push(AnthropicEvent::new(
            "content_block_stop",
            json!({"type": "content_block_stop", "index": self.block_index}),
        ));
        self.block_index += 1;
    }
}

// ── Aggregation: non-streaming requests served over SSE ──────────────────────

/// For thinking models the upstream only returns full content via SSE. This
/// collects the chunks back into one [`VendorResponse`] so the non-streaming
/// converter can run over it.
#[derive(Default)]
pub struct PartAggregator {
    parts: Vec<Part>,
    thinking_buf: String,
    thinking_signature: String,
    text_buf: String,
    finish_reason: Option<String>,
    usage: Option<UsageMetadata>,
}

impl PartAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &VendorResponse) {
        if let Some(usage) = chunk.usage_metadata {
            self.usage = Some(usage);
        }
        if let Some(candidate) = chunk.candidates.first() {
            for part in &candidate.content.parts {
                self.push_part(part);
            }
            if let Some(reason) = &candidate.finish_reason {
                self.finish_reason = Some(reason.clone());
            }
        }
    }

    fn push_part(&mut self, part: &Part) {
        if let Some(call) = &part.function_call {
            self.flush_thinking();
            self.flush_text();
            self.parts.push(Part {
                text: None,
                thought: false,
                thought_signature: part.thought_signature.clone(),
                function_call: Some(call.clone()),
            });
            return;
        }
        let text = match &part.text {
            Some(text) => text,
            None => return,
        };
        if part.thought {
            self.thinking_buf.push_str(text);
            if let Some(sig) = &part.thought_signature {
                if sig.len() > self.thinking_signature.len() {
                    self.thinking_signature = sig.clone();
                }
            }
        } else {
            self.flush_thinking();
            self.text_buf.push_str(text);
        }
    }

    fn flush_thinking(&mut self) {
        if self.thinking_buf.is_empty() {
            return;
        }
        self.parts.push(Part {
            text: Some(std::mem::take(&mut self.thinking_buf)),
            thought: true,
            thought_signature: if self.thinking_signature.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut self.thinking_signature))
            },
            function_call: None,
        });
    }

    fn flush_text(&mut self) {
        if self.text_buf.is_empty() {
            return;
        }
        self.parts.push(Part {
            text: Some(std::mem::take(&mut self.text_buf)),
            thought: false,
            thought_signature: None,
            function_call: None,
        });
    }

    /// Finish aggregation and reconstruct the response object.
    pub fn into_response(mut self) -> VendorResponse {
        self.flush_thinking();
        self.flush_text();
        VendorResponse {
            candidates: vec![crate::response::Candidate {
                content: VendorContent { parts: self.parts },
                finish_reason: self.finish_reason,
            }],
            usage_metadata: self.usage,
            model_version: None,
        }
    }
}
