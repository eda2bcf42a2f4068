//! OpenAI Chat Completions shim: translates incoming requests into the
//! Anthropic shape the rest of the pipeline speaks, and folds responses
//! (streaming and not) back into OpenAI chunks.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use serde_json::{json, Value};

use gravity_core::{GravityError, Result};

use crate::blocks::{
    ContentBlock, MediaSource, Message, MessageContent, MessagesRequest, MessagesResponse, Role,
    SystemPrompt, ToolChoice, ToolResultContent,
};
use crate::stream::AnthropicEvent;

// ── Incoming request ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    #[serde(default)]
    pub stream: bool,
    pub max_tokens: Option<u32>,
    pub max_completion_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Option<Value>,
    pub tools: Option<Vec<Value>>,
    pub tool_choice: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<Value>,
    pub tool_calls: Option<Vec<Value>>,
    pub tool_call_id: Option<String>,
}

/// Translate an OpenAI request into the Anthropic request the converter
/// pipeline consumes.
pub fn to_messages_request(req: &OpenAiRequest) -> Result<MessagesRequest> {
    let mut system_chunks: Vec<String> = Vec::new();
    let mut messages: Vec<Message> = Vec::new();

    for message in &req.messages {
        match message.role.as_str() {
            "system" | "developer" => {
                if let Some(text) = text_of(message.content.as_ref()) {
                    if !text.is_empty() {
                        system_chunks.push(text);
                    }
                }
            }
            "tool" => {
                let id = message.tool_call_id.clone().ok_or_else(|| {
                    GravityError::BadRequest("tool message without tool_call_id".into())
                })?;
                messages.push(Message {
                    role: Role::User,
                    content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                        tool_use_id: id,
                        name: None,
                        content: Some(ToolResultContent::Text(
                            text_of(message.content.as_ref()).unwrap_or_default(),
                        )),
                    }]),
                });
            }
            "assistant" => {
                let mut blocks: Vec<ContentBlock> = Vec::new();
                if let Some(text) = text_of(message.content.as_ref()) {
                    if !text.is_empty() {
                        blocks.push(ContentBlock::Text { text });
                    }
                }
                for call in message.tool_calls.as_deref().unwrap_or(&[]) {
                    let function = call.get("function").cloned().unwrap_or_default();
                    let arguments = function
                        .get("arguments")
                        .and_then(|a| a.as_str())
                        .and_then(|a| serde_json::from_str(a).ok())
                        .unwrap_or_else(|| json!({}));
                    blocks.push(ContentBlock::ToolUse {
                        id: call
                            .get("id")
                            .and_then(|i| i.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        name: function
                            .get("name")
                            .and_then(|n| n.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        input: arguments,
                        signature: None,
                    });
                }
                messages.push(Message {
                    role: Role::Assistant,
                    content: MessageContent::Blocks(blocks),
                });
            }
            _ => {
                messages.push(Message {
                    role: Role::User,
                    content: user_content(message.content.as_ref()),
                });
            }
        }
    }

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| {
                let function = tool.get("function").cloned().unwrap_or_else(|| tool.clone());
                json!({
                    "name": function.get("name").cloned().unwrap_or(Value::Null),
                    "description": function.get("description").cloned().unwrap_or(json!("")),
                    "input_schema": function
                        .get("parameters")
                        .cloned()
                        .unwrap_or_else(|| json!({"type": "object"})),
                })
            })
            .collect::<Vec<_>>()
    });

    let tool_choice = req.tool_choice.as_ref().and_then(|choice| match choice {
        Value::String(s) => match s.as_str() {
            "none" => Some(ToolChoice::None),
            "auto" => Some(ToolChoice::Auto),
            "required" => Some(ToolChoice::Any),
            _ => None,
        },
        Value::Object(obj) => obj
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(|n| n.as_str())
            .map(|name| ToolChoice::Tool {
                name: name.to_string(),
            }),
        _ => None,
    });

    let stop_sequences = req.stop.as_ref().and_then(|stop| match stop {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(values) => Some(
            values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    });

    Ok(MessagesRequest {
        model: req.model.clone(),
        messages,
        max_tokens: req.max_tokens.or(req.max_completion_tokens),
        stream: req.stream,
        system: if system_chunks.is_empty() {
            None
        } else {
            Some(SystemPrompt::Text(system_chunks.join("\n\n")))
        },
        tools,
        tool_choice,
        thinking: None,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        stop_sequences,
    })
}

/// Plain text of an OpenAI content value (string or text-part array).
fn text_of(content: Option<&Value>) -> Option<String> {
    match content? {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => Some(
            parts
                .iter()
                .filter_map(|p| {
                    if p.get("type").and_then(|t| t.as_str()) == Some("text") {
                        p.get("text").and_then(|t| t.as_str())
                    } else {
                        None
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
}

/// User content keeps its structure: text parts plus image_url parts.
fn user_content(content: Option<&Value>) -> MessageContent {
    match content {
        Some(Value::String(s)) => MessageContent::Text(s.clone()),
        Some(Value::Array(parts)) => {
            let mut blocks = Vec::new();
            for part in parts {
                match part.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                            blocks.push(ContentBlock::Text {
                                text: text.to_string(),
                            });
                        }
                    }
                    Some("image_url") => {
                        if let Some(url) = part
                            .get("image_url")
                            .and_then(|i| i.get("url"))
                            .and_then(|u| u.as_str())
                        {
                            blocks.push(ContentBlock::Image {
                                source: image_source_from_url(url),
                            });
                        }
                    }
                    _ => {}
                }
            }
            MessageContent::Blocks(blocks)
        }
        _ => MessageContent::Text(String::new()),
    }
}

/// OpenAI image urls are either real URLs or `data:` URIs with the payload
/// inline; the latter convert to a base64 source.
fn image_source_from_url(url: &str) -> MediaSource {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((meta, data)) = rest.split_once(",") {
            let media_type = meta.split(';').next().filter(|m| !m.is_empty());
            return MediaSource::Base64 {
                media_type: media_type.map(str::to_string),
                data: data.to_string(),
            };
        }
    }
    MediaSource::Url {
        url: url.to_string(),
        media_type: None,
    }
}

// ── Outgoing non-streaming ───────────────────────────────────────────────────

fn map_stop_reason(reason: Option<&str>) -> &'static str {
    match reason {
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        // end_turn, stop_sequence, and anything else
        _ => "stop",
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Fold an Anthropic response into one OpenAI chat.completion object.
/// Thinking blocks are dropped; the OpenAI wire has no slot for them.
pub fn from_messages_response(resp: &MessagesResponse) -> Value {
    let mut text_chunks: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    for block in &resp.content {
        match block {
            ContentBlock::Text { text } => text_chunks.push(text),
            ContentBlock::ToolUse { id, name, input, .. } => {
                tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": input.to_string(),
                    },
                }));
            }
            _ => {}
        }
    }

    let mut message = json!({
        "role": "assistant",
        "content": if text_chunks.is_empty() {
            Value::Null
        } else {
            Value::String(text_chunks.join(""))
        },
    });
    if !tool_calls.is_empty() {
        message["tool_calls"] = json!(tool_calls);
    }

    json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion",
        "created": unix_now(),
        "model": resp.model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": map_stop_reason(resp.stop_reason.as_deref()),
        }],
        "usage": {
            "prompt_tokens": resp.usage.input_tokens,
            "completion_tokens": resp.usage.output_tokens,
            "total_tokens": resp.usage.input_tokens + resp.usage.output_tokens,
        },
    })
}

// ── Outgoing streaming ───────────────────────────────────────────────────────

/// Maps the Anthropic event stream onto `chat.completion.chunk` objects.
/// Zero or one chunk per event; the caller appends the `[DONE]` sentinel.
pub struct OpenAiStreamAdapter {
    id: String,
    model: String,
    created: u64,
    /// Anthropic block index → OpenAI tool-call index.
    tool_indices: HashMap<u64, usize>,
}

impl OpenAiStreamAdapter {
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            model: model.to_string(),
            created: unix_now(),
            tool_indices: HashMap::new(),
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        })
    }

    pub fn on_event(&mut self, event: &AnthropicEvent) -> Option<Value> {
        match event.name {
            "message_start" => Some(self.chunk(json!({"role": "assistant"}), None)),
            "content_block_start" => {
                let block = event.data.get("content_block")?;
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => Some(self.chunk(json!({"content": ""}), None)),
                    Some("tool_use") => {
                        let block_index = event.data.get("index")?.as_u64()?;
                        let tool_index = self.tool_indices.len();
                        self.tool_indices.insert(block_index, tool_index);
                        Some(self.chunk(
                            json!({
                                "tool_calls": [{
                                    "index": tool_index,
                                    "id": block.get("id"),
                                    "type": "function",
                                    "function": {
                                        "name": block.get("name"),
                                        "arguments": "",
                                    },
                                }],
                            }),
                            None,
                        ))
                    }
                    _ => None,
                }
            }
            "content_block_delta" => {
                let delta = event.data.get("delta")?;
                match delta.get("type").and_then(|t| t.as_str()) {
                    Some("text_delta") => {
                        Some(self.chunk(json!({"content": delta.get("text")}), None))
                    }
                    Some("input_json_delta") => {
                        let block_index = event.data.get("index")?.as_u64()?;
                        let tool_index = *self.tool_indices.get(&block_index)?;
                        Some(self.chunk(
                            json!({
                                "tool_calls": [{
                                    "index": tool_index,
                                    "function": {"arguments": delta.get("partial_json")},
                                }],
                            }),
                            None,
                        ))
                    }
                    // thinking and signature deltas have no OpenAI shape
                    _ => None,
                }
            }
            "message_delta" => {
                let reason = event
                    .data
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(|r| r.as_str());
                Some(self.chunk(json!({}), Some(map_stop_reason(reason))))
            }
            "message_stop" => Some(self.chunk(json!({}), Some("stop"))),
            _ => None,
        }
    }
}
