//! Assembly of the outgoing Cloud Code request: system instruction,
//! converted message history, generation config, and sanitized tools.

use serde_json::{json, Value};
use tracing::debug;

use gravity_core::config::MODEL_PREFIX;
use gravity_core::{GravityError, Result};

use crate::blocks::{
    ContentBlock, MessageContent, MessagesRequest, Role, SystemPrompt, ToolChoice,
};
use crate::content::{build_tool_name_map, convert_content, vendor_role, ConversionContext};
use crate::model::{family_of, is_thinking_model, normalize_model, session_id, ModelFamily};
use crate::schema::{sanitize_for_claude, sanitize_for_gemini};
use crate::signature::SignatureCache;
use crate::thinking::{
    filter_unsigned_parts, log_conversation_state, remove_trailing_unsigned, reorder,
    restore_signatures,
};

/// Gemini caps output length well below what clients ask for.
const GEMINI_MAX_OUTPUT_TOKENS: u32 = 16_384;

/// Default reasoning budget for Gemini thinking models. Claude omits the
/// budget entirely when the caller did not set one.
const GEMINI_DEFAULT_THINKING_BUDGET: u32 = 16_000;

/// Appended to the system prompt for thinking-capable Claude models with
/// tools, switching the upstream into interleaved reasoning.
const INTERLEAVED_THINKING_HINT: &str =
    "Interleaved thinking is enabled. You may reason between tool calls and \
     after receiving tool results before producing your final answer.";

/// A fully converted upstream request plus the metadata the client and the
/// dispatcher need alongside it.
#[derive(Debug, Clone)]
pub struct BuiltRequest {
    /// The `request` payload of the upstream envelope.
    pub payload: Value,
    /// Normalized model name (routing prefix stripped).
    pub model: String,
    pub family: ModelFamily,
    pub thinking: bool,
    /// Stable id for upstream prompt-cache affinity.
    pub session_id: String,
    /// Rough token cost of the exported tool definitions, for metrics.
    pub tool_tokens: u32,
}

pub fn build_vendor_request(
    req: &MessagesRequest,
    signatures: &SignatureCache,
) -> Result<BuiltRequest> {
    let model = normalize_model(&req.model, MODEL_PREFIX);
    let family = family_of(&model);
    let thinking = is_thinking_model(&model);

    log_conversation_state(&req.messages, family);

    let (tools, tool_tokens) = export_tools(req, family)?;

    // System prompt: strings become one text part, block arrays keep only
    // their text blocks.
    let mut system_parts: Vec<Value> = match &req.system {
        Some(SystemPrompt::Text(text)) if !text.is_empty() => vec![json!({"text": text})],
        Some(SystemPrompt::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(json!({"text": text})),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    if family == ModelFamily::Claude && thinking && !tools.is_empty() {
        system_parts.push(json!({"text": INTERLEAVED_THINKING_HINT}));
    }

    let tool_names = build_tool_name_map(&req.messages);
    let ctx = ConversionContext {
        family,
        tool_names: &tool_names,
        signatures,
    };

    let mut contents: Vec<Value> = Vec::with_capacity(req.messages.len());
    for message in &req.messages {
        let content = if message.role == Role::Assistant {
            // Assistant history needs its thinking hygiene re-established:
            // clients mangle signatures and block order on the round trip.
            match &message.content {
                MessageContent::Blocks(blocks) => {
                    let blocks = restore_signatures(blocks.clone(), family);
                    let blocks = remove_trailing_unsigned(blocks, family);
                    MessageContent::Blocks(reorder(blocks))
                }
                other => other.clone(),
            }
        } else {
            message.content.clone()
        };

        let mut parts = convert_content(&content, &ctx);
        if family != ModelFamily::Unknown {
            filter_unsigned_parts(&mut parts, family);
        }
        if parts.is_empty() {
            // The upstream requires at least one part per message.
            parts.push(json!({"text": ""}));
        }
        contents.push(json!({
            "role": vendor_role(message.role),
            "parts": parts,
        }));
    }

    let sid = session_id(&req.messages);

    let mut payload = json!({
        "contents": contents,
        "generationConfig": generation_config(req, family, thinking),
        "sessionId": sid,
    });
    if !system_parts.is_empty() {
        payload["systemInstruction"] = json!({"parts": system_parts});
    }
    if !tools.is_empty() {
        payload["tools"] = json!([{"functionDeclarations": tools}]);
    }

    debug!(
        model = %model,
        family = family.as_str(),
        thinking,
        tools = tools.len(),
        session = %sid,
        "built upstream request"
    );

    Ok(BuiltRequest {
        payload,
        model,
        family,
        thinking,
        session_id: sid,
        tool_tokens,
    })
}

fn generation_config(req: &MessagesRequest, family: ModelFamily, thinking: bool) -> Value {
    let mut config = json!({});

    if let Some(max_tokens) = req.max_tokens {
        let capped = if family == ModelFamily::Gemini {
            max_tokens.min(GEMINI_MAX_OUTPUT_TOKENS)
        } else {
            max_tokens
        };
        config["maxOutputTokens"] = json!(capped);
    }
    if let Some(temperature) = req.temperature {
        config["temperature"] = json!(temperature);
    }
    if let Some(top_p) = req.top_p {
        config["topP"] = json!(top_p);
    }
    if let Some(top_k) = req.top_k {
        config["topK"] = json!(top_k);
    }
    if let Some(stop) = &req.stop_sequences {
        if !stop.is_empty() {
            config["stopSequences"] = json!(stop);
        }
    }

    if thinking {
        let budget = req.thinking.as_ref().and_then(|t| t.budget_tokens);
        config["thinkingConfig"] = match family {
            // Claude takes snake_case keys here and tolerates a missing budget.
            ModelFamily::Claude => {
                let mut tc = json!({"include_thoughts": true});
                if let Some(budget) = budget {
                    tc["thinking_budget"] = json!(budget);
                }
                tc
            }
            _ => json!({
                "includeThoughts": true,
                "thinkingBudget": budget.unwrap_or(GEMINI_DEFAULT_THINKING_BUDGET),
            }),
        };
    }

    config
}

/// Pull tool definitions out of whichever shape the client used, sanitize
/// the schemas for the target family, and estimate their token cost.
fn export_tools(req: &MessagesRequest, family: ModelFamily) -> Result<(Vec<Value>, u32)> {
    if matches!(req.tool_choice, Some(ToolChoice::None)) {
        return Ok((Vec::new(), 0));
    }
    let raw_tools = match &req.tools {
        Some(tools) if !tools.is_empty() => tools,
        _ => return Ok((Vec::new(), 0)),
    };

    let mut exported = Vec::with_capacity(raw_tools.len());
    let mut total_tokens: u32 = 0;

    for raw in raw_tools {
        let (name, description, mut parameters) = extract_tool(raw)?;
        let name = export_tool_name(&name);
        if name.is_empty() {
            continue;
        }

        match family {
            ModelFamily::Claude => sanitize_for_claude(&mut parameters),
            _ => sanitize_for_gemini(&mut parameters),
        }

        total_tokens += estimate_tool_tokens(&name, &description, &parameters);
        exported.push(json!({
            "name": name,
            "description": description,
            "parameters": parameters,
        }));
    }

    Ok((exported, total_tokens))
}

/// Tools arrive Anthropic-native (`input_schema`), OpenAI-wrapped
/// (`function.parameters`), or half-converted (`parameters`).
fn extract_tool(raw: &Value) -> Result<(String, String, Value)> {
    let obj = raw
        .as_object()
        .ok_or_else(|| GravityError::BadRequest("tool definition is not an object".into()))?;

    let source = if let Some(function) = obj.get("function").and_then(|f| f.as_object()) {
        function
    } else {
        obj
    };

    let name = source
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| GravityError::BadRequest("tool definition without a name".into()))?
        .to_string();
    let description = source
        .get("description")
        .and_then(|d| d.as_str())
        .unwrap_or("")
        .to_string();
    let parameters = source
        .get("input_schema")
        .or_else(|| source.get("parameters"))
        .cloned()
        .unwrap_or_else(|| json!({"type": "object"}));

    Ok((name, description, parameters))
}

/// The upstream only accepts `[a-zA-Z0-9_-]` names up to 64 chars.
fn export_tool_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .take(64)
        .collect()
}

/// ~4 chars per token over the tool's visible surface, plus fixed overhead.
fn estimate_tool_tokens(name: &str, description: &str, parameters: &Value) -> u32 {
    let schema_len = serde_json::to_string(parameters).map(|s| s.len()).unwrap_or(0);
    let chars = name.len() + description.len() + schema_len;
    (chars.div_ceil(4) + 10) as u32
}
