//! Inverse translation: Cloud Code responses back into the Anthropic shape.
//!
//! The typed vendor structs here are shared with the streaming converter,
//! which sees the same `parts` one SSE chunk at a time.

use serde::Deserialize;
use serde_json::Value;

use crate::blocks::{ContentBlock, MessagesResponse, Usage};
use crate::model::ModelFamily;
use crate::signature::{signature_is_valid, SignatureCache};

// ── Vendor wire types ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub usage_metadata: Option<UsageMetadata>,
    pub model_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: VendorContent,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VendorContent {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub text: Option<String>,
    #[serde(default)]
    pub thought: bool,
    pub thought_signature: Option<String>,
    pub function_call: Option<FunctionCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u64,
    #[serde(default)]
    pub candidates_token_count: u64,
    #[serde(default)]
    pub cached_content_token_count: u64,
}

impl UsageMetadata {
    /// The upstream's prompt count is the total including cache hits; the
    /// Anthropic shape reports fresh input and cache reads separately.
    pub fn to_usage(self) -> Usage {
        Usage {
            input_tokens: self
                .prompt_token_count
                .saturating_sub(self.cached_content_token_count),
            output_tokens: self.candidates_token_count,
            cache_read_input_tokens: self.cached_content_token_count,
            cache_creation_input_tokens: 0,
        }
    }
}

// ── Conversion ───────────────────────────────────────────────────────────────

pub fn new_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

pub fn new_tool_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("toolu_{}", &hex[..24])
}

pub fn map_finish_reason(reason: Option<&str>, has_tool_use: bool) -> String {
    if has_tool_use {
        return "tool_use".to_string();
    }
    match reason {
        Some("STOP") => "end_turn",
        Some("MAX_TOKENS") => "max_tokens",
        Some("TOOL_USE") => "tool_use",
        _ => "end_turn",
    }
    .to_string()
}

/// Convert a complete vendor response into the Anthropic message shape.
pub fn convert_response(
    resp: &VendorResponse,
    model: &str,
    family: ModelFamily,
    signatures: &SignatureCache,
) -> MessagesResponse {
    let mut content: Vec<ContentBlock> = Vec::new();
    let mut has_tool_use = false;
    let candidate = resp.candidates.first();

    if let Some(candidate) = candidate {
        for part in &candidate.content.parts {
            if let Some(call) = &part.function_call {
                has_tool_use = true;
                let id = call
                    .id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(new_tool_id);
                let signature = part
                    .thought_signature
                    .as_deref()
                    .filter(|s| signature_is_valid(s, family))
                    .map(str::to_string);
                if let Some(sig) = &signature {
                    signatures.put(&id, sig);
                }
                content.push(ContentBlock::ToolUse {
                    id,
                    name: call.name.clone(),
                    input: call.args.clone(),
                    signature,
                });
            } else if let Some(text) = &part.text {
                if part.thought {
                    content.push(ContentBlock::Thinking {
                        thinking: text.clone(),
                        signature: part.thought_signature.clone().unwrap_or_default(),
                    });
                } else {
                    content.push(ContentBlock::Text { text: text.clone() });
                }
            }
        }
    }

    let stop_reason = map_finish_reason(
        candidate.and_then(|c| c.finish_reason.as_deref()),
        has_tool_use,
    );
    let usage = resp.usage_metadata.unwrap_or_default().to_usage();

    MessagesResponse {
        id: new_message_id(),
        kind: "message",
        role: "assistant",
        model: model.to_string(),
        content,
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vendor(v: Value) -> VendorResponse {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn parses_camel_case_wire() {
        let resp = vendor(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "thought", "thought": true, "thoughtSignature": "sig"},
                    {"text": "answer"}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 120,
                "candidatesTokenCount": 30,
                "cachedContentTokenCount": 100
            }
        }));
        assert_eq!(resp.candidates.len(), 1);
        assert!(resp.candidates[0].content.parts[0].thought);
    }

    #[test]
    fn usage_subtracts_cache_reads() {
        let usage = UsageMetadata {
            prompt_token_count: 120,
            candidates_token_count: 30,
            cached_content_token_count: 100,
        }
        .to_usage();
        assert_eq!(usage.input_tokens, 20);
        assert_eq!(usage.cache_read_input_tokens, 100);
        assert_eq!(usage.output_tokens, 30);
        assert_eq!(usage.cache_creation_input_tokens, 0);
    }

    #[test]
    fn thinking_and_text_blocks_mapped() {
        let resp = vendor(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "reasoning", "thought": true, "thoughtSignature": "s"},
                    {"text": "visible"}
                ]},
                "finishReason": "STOP"
            }]
        }));
        let out = convert_response(&resp, "gemini-3-flash", ModelFamily::Gemini, &SignatureCache::new());
        assert_eq!(out.content.len(), 2);
        match &out.content[0] {
            ContentBlock::Thinking { thinking, signature } => {
                assert_eq!(thinking, "reasoning");
                assert_eq!(signature, "s");
            }
            _ => panic!("expected thinking"),
        }
        assert_eq!(out.stop_reason.as_deref(), Some("end_turn"));
        assert!(out.id.starts_with("msg_"));
    }

    #[test]
    fn function_call_becomes_tool_use_and_caches_signature() {
        let cache = SignatureCache::new();
        let sig = "s".repeat(60);
        let resp = vendor(json!({
            "candidates": [{
                "content": {"parts": [{
                    "functionCall": {"name": "search", "args": {"q": "x"}, "id": "abc"},
                    "thoughtSignature": sig
                }]},
                "finishReason": "STOP"
            }]
        }));
        let out = convert_response(&resp, "gemini-3-flash", ModelFamily::Gemini, &cache);
        match &out.content[0] {
            ContentBlock::ToolUse { id, name, signature, .. } => {
                assert_eq!(id, "abc");
                assert_eq!(name, "search");
                assert_eq!(signature.as_deref(), Some(sig.as_str()));
            }
            _ => panic!("expected tool_use"),
        }
        // tool-use presence forces the stop reason regardless of finishReason
        assert_eq!(out.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(cache.get("abc"), Some(sig));
    }

    #[test]
    fn missing_call_id_gets_generated() {
        let resp = vendor(json!({
            "candidates": [{
                "content": {"parts": [{"functionCall": {"name": "f", "args": {}}}]}
            }]
        }));
        let out = convert_response(&resp, "m", ModelFamily::Gemini, &SignatureCache::new());
        match &out.content[0] {
            ContentBlock::ToolUse { id, .. } => {
                assert!(id.starts_with("toolu_"));
                assert_eq!(id.len(), "toolu_".len() + 24);
            }
            _ => panic!("expected tool_use"),
        }
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(map_finish_reason(Some("STOP"), false), "end_turn");
        assert_eq!(map_finish_reason(Some("MAX_TOKENS"), false), "max_tokens");
        assert_eq!(map_finish_reason(Some("TOOL_USE"), false), "tool_use");
        assert_eq!(map_finish_reason(Some("STOP"), true), "tool_use");
        assert_eq!(map_finish_reason(None, false), "end_turn");
    }

    #[test]
    fn empty_response_yields_empty_content() {
        let out = convert_response(
            &VendorResponse::default(),
            "m",
            ModelFamily::Gemini,
            &SignatureCache::new(),
        );
        assert!(out.content.is_empty());
        assert_eq!(out.usage.input_tokens, 0);
    }
}
