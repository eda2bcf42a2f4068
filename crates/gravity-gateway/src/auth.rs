//! Server-key authentication: bearer or `x-api-key`, compared in constant
//! time. The health endpoint stays open for probes.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::info;

use gravity_core::config::ServerConfig;

use crate::app::AppState;

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let headers = req.headers();
    let provided = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });

    match provided {
        Some(key) if keys_match(key, &state.api_key) => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "type": "error",
                "error": {
                    "type": "authentication_error",
                    "message": "invalid or missing api key",
                },
            })),
        )
            .into_response(),
    }
}

/// Constant-time equality; length differences short-circuit, which is fine
/// because the key length is not a secret.
fn keys_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Server API key resolution: config/env value, then the persisted key
/// file, then generate-and-persist.
pub fn resolve_api_key(config: &ServerConfig) -> std::io::Result<String> {
    if let Some(key) = &config.api_key {
        if !key.is_empty() {
            return Ok(key.clone());
        }
    }

    match std::fs::read_to_string(&config.api_key_path) {
        Ok(key) if !key.trim().is_empty() => return Ok(key.trim().to_string()),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let key = gravity_core::config::GravityConfig::generate_api_key();
    if let Some(parent) = std::path::Path::new(&config.api_key_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&config.api_key_path, &key)?;
    info!(path = %config.api_key_path, "generated new server api key");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_comparison() {
        assert!(keys_match("ag_abc", "ag_abc"));
        assert!(!keys_match("ag_abc", "ag_abd"));
        assert!(!keys_match("ag_abc", "ag_abcdef"));
        assert!(!keys_match("", "ag_abc"));
    }

    #[test]
    fn resolve_generates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_key");
        let config = ServerConfig {
            api_key: None,
            api_key_path: path.to_string_lossy().to_string(),
            ..ServerConfig::default()
        };

        let first = resolve_api_key(&config).unwrap();
        assert!(first.starts_with("ag_"));
        assert_eq!(first.len(), 3 + 64);

        // second resolution reads the same key back
        let second = resolve_api_key(&config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn resolve_prefers_configured_key() {
        let config = ServerConfig {
            api_key: Some("ag_configured".into()),
            api_key_path: "/nonexistent/api_key".into(),
            ..ServerConfig::default()
        };
        assert_eq!(resolve_api_key(&config).unwrap(), "ag_configured");
    }
}
