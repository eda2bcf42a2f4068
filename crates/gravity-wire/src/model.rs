//! Model identity: name normalization, family detection, thinking capability,
//! and the stable session id used for upstream prompt-cache affinity.

use sha2::{Digest, Sha256};

use crate::blocks::{Message, MessageContent, Role};

/// Which upstream model family a request targets. Families differ in wire
/// quirks: schema dialect, thinking config casing, tool-result handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    Claude,
    Gemini,
    Unknown,
}

impl ModelFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Claude => "claude",
            ModelFamily::Gemini => "gemini",
            ModelFamily::Unknown => "unknown",
        }
    }
}

/// Strip the proxy's routing prefix from a client-supplied model name.
pub fn normalize_model(model: &str, prefix: &str) -> String {
    model
        .strip_prefix(prefix)
        .unwrap_or(model)
        .to_string()
}

pub fn family_of(model: &str) -> ModelFamily {
    let lower = model.to_lowercase();
    if lower.contains("claude") {
        ModelFamily::Claude
    } else if lower.contains("gemini") {
        ModelFamily::Gemini
    } else {
        ModelFamily::Unknown
    }
}

/// Whether the model emits thinking parts. Claude models opt in via a
/// `thinking` variant; Gemini models do from major version 3 onward.
pub fn is_thinking_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    match family_of(&lower) {
        ModelFamily::Claude => lower.contains("thinking"),
        ModelFamily::Gemini => lower.contains("thinking") || gemini_major(&lower) >= 3,
        ModelFamily::Unknown => false,
    }
}

/// First run of digits after "gemini" — `gemini-3-flash` → 3, `gemini-2.5-pro` → 2.
fn gemini_major(lower: &str) -> u32 {
    let rest = match lower.split_once("gemini") {
        Some((_, rest)) => rest,
        None => return 0,
    };
    let digits: String = rest
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

/// Stable per-conversation id for upstream cache affinity: SHA-256 of the
/// first user message's concatenated text, truncated to 32 hex chars. A
/// conversation with no user message gets a random id instead.
pub fn session_id(messages: &[Message]) -> String {
    let first_user_text = messages
        .iter()
        .find(|m| m.role == Role::User)
        .map(|m| match &m.content {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(_) => m.content.joined_text(),
        });

    match first_user_text {
        Some(text) => {
            let digest = Sha256::digest(text.as_bytes());
            hex::encode(digest)[..32].to_string()
        }
        None => uuid::Uuid::new_v4().simple().to_string(),
    }
}
