//! Model listing and the unimplemented token-count endpoint.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

const MODEL_LIST_CREATED: u64 = 1_735_689_600; // 2025-01-01

struct ListedModel {
    id: &'static str,
    owned_by: &'static str,
    description: &'static str,
}

const MODELS: &[ListedModel] = &[
    ListedModel {
        id: "claude-sonnet-4-5",
        owned_by: "anthropic",
        description: "Claude Sonnet via Cloud Code",
    },
    ListedModel {
        id: "claude-opus-4-5-thinking",
        owned_by: "anthropic",
        description: "Claude Opus with extended thinking via Cloud Code",
    },
    ListedModel {
        id: "gemini-3-flash",
        owned_by: "google",
        description: "Gemini 3 Flash via Cloud Code",
    },
    ListedModel {
        id: "gemini-3-pro",
        owned_by: "google",
        description: "Gemini 3 Pro via Cloud Code",
    },
    ListedModel {
        id: "gemini-2.5-flash",
        owned_by: "google",
        description: "Gemini 2.5 Flash via Cloud Code",
    },
];

pub async fn list_models_handler() -> Json<Value> {
    let data: Vec<Value> = MODELS
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "object": "model",
                "created": MODEL_LIST_CREATED,
                "owned_by": m.owned_by,
                "description": m.description,
            })
        })
        .collect();
    Json(json!({"object": "list", "data": data}))
}

/// Token counting would require the upstream's tokenizer; the proxy does
/// not pretend to have one.
pub async fn count_tokens_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(json!({
            "type": "error",
            "error": {
                "type": "not_implemented",
                "message": "count_tokens is not supported by this proxy",
            },
        })),
    )
}
