//! Per-block translation from the Anthropic dialect into Cloud Code `parts`.
//!
//! Conversion is driven by the target model family: Claude requests carry
//! tool-call ids inside `functionCall` and receive tool results as plain
//! text (the upstream's `functionResponse` handling is unreliable for that
//! family), while Gemini requests need a `thoughtSignature` on every tool
//! call, real or placeholder.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::debug;

use crate::blocks::{ContentBlock, MediaSource, Message, MessageContent, Role, ToolResultContent};
use crate::model::ModelFamily;
use crate::signature::{signature_is_valid, SignatureCache, SKIP_SIGNATURE_MARKER};

const DEFAULT_IMAGE_MIME: &str = "image/jpeg";
const DEFAULT_DOCUMENT_MIME: &str = "application/pdf";

/// Everything block conversion needs to know about the request.
pub struct ConversionContext<'a> {
    pub family: ModelFamily,
    /// tool_use_id → tool name, built over the whole conversation.
    pub tool_names: &'a HashMap<String, String>,
    pub signatures: &'a SignatureCache,
}

/// The upstream's role vocabulary is just `user` and `model`.
pub fn vendor_role(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        _ => "user",
    }
}

/// Map tool_use_id → tool name across the conversation. Assistant
/// `tool_use` blocks are authoritative; a `name` echoed on a user
/// `tool_result` only fills gaps.
pub fn build_tool_name_map(messages: &[Message]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for message in messages {
        if message.role != Role::Assistant {
            continue;
        }
        for block in message.content.blocks() {
            if let ContentBlock::ToolUse { id, name, .. } = block {
                map.insert(id.clone(), name.clone());
            }
        }
    }
    for message in messages {
        for block in message.content.blocks() {
            if let ContentBlock::ToolResult {
                tool_use_id,
                name: Some(name),
                ..
            } = block
            {
                map.entry(tool_use_id.clone()).or_insert_with(|| name.clone());
            }
        }
    }
    map
}

/// Convert one message's content into vendor parts. May return an empty
/// vector; the request converter substitutes a placeholder part in that case.
pub fn convert_content(content: &MessageContent, ctx: &ConversionContext) -> Vec<Value> {
    match content {
        MessageContent::Text(text) => {
            if text.trim().is_empty() {
                Vec::new()
            } else {
                vec![json!({"text": text})]
            }
        }
        MessageContent::Blocks(blocks) => {
            let mut parts = Vec::new();
            for block in blocks {
                convert_block(block, ctx, &mut parts);
            }
            parts
        }
    }
}

fn convert_block(block: &ContentBlock, ctx: &ConversionContext, parts: &mut Vec<Value>) {
    match block {
        ContentBlock::Text { text } => {
            if !text.trim().is_empty() {
                parts.push(json!({"text": text}));
            }
        }
        ContentBlock::Image { source } => {
            parts.push(media_part(source, DEFAULT_IMAGE_MIME));
        }
        ContentBlock::Document { source } => {
            parts.push(media_part(source, DEFAULT_DOCUMENT_MIME));
        }
        ContentBlock::ToolUse {
            id,
            name,
            input,
            signature,
        } => {
            parts.push(tool_use_part(id, name, input, signature.as_deref(), ctx));
        }
        ContentBlock::ToolResult {
            tool_use_id,
            name,
            content,
        } => {
            convert_tool_result(tool_use_id, name.as_deref(), content.as_ref(), ctx, parts);
        }
        ContentBlock::Thinking { thinking, signature } => {
            if signature_is_valid(signature, ctx.family) {
                parts.push(json!({
                    "text": thinking,
                    "thought": true,
                    "thoughtSignature": signature,
                }));
            }
        }
        // Redacted thinking has no vendor representation; the upstream
        // re-derives it from the signature chain.
        ContentBlock::RedactedThinking { .. } => {}
        ContentBlock::Unknown => {}
    }
}

fn media_part(source: &MediaSource, default_mime: &str) -> Value {
    match source {
        MediaSource::Base64 { media_type, data } => json!({
            "inlineData": {
                "mimeType": media_type.as_deref().unwrap_or(default_mime),
                "data": data,
            }
        }),
        MediaSource::Url { url, media_type } => json!({
            "fileData": {
                "mimeType": media_type.as_deref().unwrap_or(default_mime),
                "fileUri": url,
            }
        }),
    }
}

fn tool_use_part(
    id: &str,
    name: &str,
    input: &Value,
    block_signature: Option<&str>,
    ctx: &ConversionContext,
) -> Value {
    let mut call = json!({"name": name, "args": input});
    if ctx.family == ModelFamily::Claude {
        call["id"] = json!(id);
    }
    let mut part = json!({"functionCall": call});

    if ctx.family == ModelFamily::Gemini {
        // Signature resolution order: the block's own, then the cache, then
        // the marker that tells the upstream not to validate at all.
        let signature = block_signature
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| ctx.signatures.get(id))
            .unwrap_or_else(|| SKIP_SIGNATURE_MARKER.to_string());
        part["thoughtSignature"] = json!(signature);
    }
    part
}

fn convert_tool_result(
    tool_use_id: &str,
    own_name: Option<&str>,
    content: Option<&ToolResultContent>,
    ctx: &ConversionContext,
    parts: &mut Vec<Value>,
) {
    let name = own_name
        .map(str::to_string)
        .or_else(|| ctx.tool_names.get(tool_use_id).cloned());
    let name = match name {
        Some(name) => name,
        None => {
            // No way to tell the upstream which function this answers.
            debug!(tool_use_id, "dropping tool_result with unresolvable name");
            return;
        }
    };

    let text = result_text(content);

    if ctx.family == ModelFamily::Claude {
        parts.push(json!({
            "text": format!("[Tool Result for '{name}': {text}]")
        }));
    } else {
        parts.push(json!({
            "functionResponse": {
                "name": name,
                "id": tool_use_id,
                "response": wrap_tool_response(ctx.family, &text),
            }
        }));
    }

    // Base64 images inside the result ride along as separate inline parts.
    if let Some(ToolResultContent::Blocks(blocks)) = content {
        for block in blocks {
            if let ContentBlock::Image {
                source: MediaSource::Base64 { media_type, data },
            } = block
            {
                parts.push(json!({
                    "inlineData": {
                        "mimeType": media_type.as_deref().unwrap_or(DEFAULT_IMAGE_MIME),
                        "data": data,
                    }
                }));
            }
        }
    }
}

fn result_text(content: Option<&ToolResultContent>) -> String {
    match content {
        Some(ToolResultContent::Text(text)) => text.clone(),
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    }
}

/// The two families expect the payload under different keys.
fn wrap_tool_response(family: ModelFamily, text: &str) -> Value {
    match family {
        ModelFamily::Claude => json!({"content": text}),
        _ => json!({"result": text}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx<'a>(
        family: ModelFamily,
        names: &'a HashMap<String, String>,
        cache: &'a SignatureCache,
    ) -> ConversionContext<'a> {
        ConversionContext {
            family,
            tool_names: names,
            signatures: cache,
        }
    }

    fn content(v: serde_json::Value) -> MessageContent {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn roles_map_to_vendor_vocabulary() {
        assert_eq!(vendor_role(Role::Assistant), "model");
        assert_eq!(vendor_role(Role::User), "user");
        assert_eq!(vendor_role(Role::System), "user");
    }

    #[test]
    fn string_content_to_text_part() {
        let names = HashMap::new();
        let cache = SignatureCache::new();
        let parts = convert_content(
            &content(json!("hello")),
            &ctx(ModelFamily::Gemini, &names, &cache),
        );
        assert_eq!(parts, vec![json!({"text": "hello"})]);

        let parts = convert_content(
            &content(json!("   ")),
            &ctx(ModelFamily::Gemini, &names, &cache),
        );
        assert!(parts.is_empty());
    }

    #[test]
    fn base64_image_becomes_inline_data() {
        let names = HashMap::new();
        let cache = SignatureCache::new();
        let parts = convert_content(
            &content(json!([{
                "type": "image",
                "source": {"type": "base64", "media_type": "image/png", "data": "aGk="}
            }])),
            &ctx(ModelFamily::Gemini, &names, &cache),
        );
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[0]["inlineData"]["data"], "aGk=");
    }

    #[test]
    fn url_image_becomes_file_data_with_default_mime() {
        let names = HashMap::new();
        let cache = SignatureCache::new();
        let parts = convert_content(
            &content(json!([{
                "type": "image",
                "source": {"type": "url", "url": "https://x/y"}
            }])),
            &ctx(ModelFamily::Gemini, &names, &cache),
        );
        assert_eq!(parts[0]["fileData"]["fileUri"], "https://x/y");
        assert_eq!(parts[0]["fileData"]["mimeType"], "image/jpeg");
    }

    #[test]
    fn document_defaults_to_pdf() {
        let names = HashMap::new();
        let cache = SignatureCache::new();
        let parts = convert_content(
            &content(json!([{
                "type": "document",
                "source": {"type": "base64", "media_type": null, "data": "eA=="}
            }])),
            &ctx(ModelFamily::Gemini, &names, &cache),
        );
        assert_eq!(parts[0]["inlineData"]["mimeType"], "application/pdf");
    }

    #[test]
    fn claude_tool_use_carries_id() {
        let names = HashMap::new();
        let cache = SignatureCache::new();
        let parts = convert_content(
            &content(json!([{
                "type": "tool_use", "id": "toolu_1", "name": "search", "input": {"q": "x"}
            }])),
            &ctx(ModelFamily::Claude, &names, &cache),
        );
        assert_eq!(parts[0]["functionCall"]["id"], "toolu_1");
        assert!(parts[0].get("thoughtSignature").is_none());
    }

    #[test]
    fn gemini_tool_use_signature_resolution_order() {
        let names = HashMap::new();
        let cache = SignatureCache::new();
        let sig = "s".repeat(60);

        // own signature wins
        let parts = convert_content(
            &content(json!([{
                "type": "tool_use", "id": "t1", "name": "f", "input": {}, "signature": sig
            }])),
            &ctx(ModelFamily::Gemini, &names, &cache),
        );
        assert_eq!(parts[0]["thoughtSignature"], sig.as_str());

        // cache fills in for stripped signatures
        cache.put("t2", &sig);
        let parts = convert_content(
            &content(json!([{"type": "tool_use", "id": "t2", "name": "f", "input": {}}])),
            &ctx(ModelFamily::Gemini, &names, &cache),
        );
        assert_eq!(parts[0]["thoughtSignature"], sig.as_str());

        // nothing known: the skip marker goes out
        let parts = convert_content(
            &content(json!([{"type": "tool_use", "id": "t3", "name": "f", "input": {}}])),
            &ctx(ModelFamily::Gemini, &names, &cache),
        );
        assert_eq!(parts[0]["thoughtSignature"], SKIP_SIGNATURE_MARKER);
    }

    #[test]
    fn gemini_tool_result_wraps_function_response() {
        let mut names = HashMap::new();
        names.insert("t1".to_string(), "search".to_string());
        let cache = SignatureCache::new();
        let parts = convert_content(
            &content(json!([{
                "type": "tool_result", "tool_use_id": "t1", "content": "found it"
            }])),
            &ctx(ModelFamily::Gemini, &names, &cache),
        );
        let fr = &parts[0]["functionResponse"];
        assert_eq!(fr["name"], "search");
        assert_eq!(fr["id"], "t1");
        assert_eq!(fr["response"]["result"], "found it");
    }

    #[test]
    fn claude_tool_result_is_textified() {
        let mut names = HashMap::new();
        names.insert("t1".to_string(), "search".to_string());
        let cache = SignatureCache::new();
        let parts = convert_content(
            &content(json!([{
                "type": "tool_result", "tool_use_id": "t1", "content": "found it"
            }])),
            &ctx(ModelFamily::Claude, &names, &cache),
        );
        assert_eq!(parts[0]["text"], "[Tool Result for 'search': found it]");
    }

    #[test]
    fn unresolvable_tool_result_is_dropped() {
        let names = HashMap::new();
        let cache = SignatureCache::new();
        let parts = convert_content(
            &content(json!([{
                "type": "tool_result", "tool_use_id": "mystery", "content": "orphan"
            }])),
            &ctx(ModelFamily::Gemini, &names, &cache),
        );
        assert!(parts.is_empty());
    }

    #[test]
    fn tool_result_images_become_extra_parts() {
        let mut names = HashMap::new();
        names.insert("t1".to_string(), "shot".to_string());
        let cache = SignatureCache::new();
        let parts = convert_content(
            &content(json!([{
                "type": "tool_result",
                "tool_use_id": "t1",
                "content": [
                    {"type": "text", "text": "screenshot attached"},
                    {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "cGc="}}
                ]
            }])),
            &ctx(ModelFamily::Gemini, &names, &cache),
        );
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0]["functionResponse"]["response"]["result"],
            "screenshot attached"
        );
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
    }

    #[test]
    fn thinking_requires_valid_signature() {
        let names = HashMap::new();
        let cache = SignatureCache::new();
        let sig = "s".repeat(50);
        let parts = convert_content(
            &content(json!([
                {"type": "thinking", "thinking": "kept", "signature": sig},
                {"type": "thinking", "thinking": "dropped", "signature": "short"}
            ])),
            &ctx(ModelFamily::Claude, &names, &cache),
        );
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0]["thought"], true);
        assert_eq!(parts[0]["text"], "kept");
    }

    #[test]
    fn name_map_prefers_assistant_tool_use() {
        let messages: Vec<Message> = serde_json::from_value(json!([
            {"role": "assistant", "content": [
                {"type": "tool_use", "id": "t1", "name": "real_name", "input": {}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "t1", "name": "echoed_name", "content": "x"},
                {"type": "tool_result", "tool_use_id": "t2", "name": "only_source", "content": "y"}
            ]}
        ]))
        .unwrap();
        let map = build_tool_name_map(&messages);
        assert_eq!(map["t1"], "real_name");
        assert_eq!(map["t2"], "only_source");
    }
}
