//! Project discovery. Every upstream call is billed against a project id;
//! accounts either declare one explicitly or we ask `loadCodeAssist` which
//! managed project the account was provisioned with.

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::account::Account;
use crate::client::{CLIENT_METADATA, ENDPOINTS};
use crate::pool::AccountPool;

/// Used when discovery fails everywhere; the upstream accepts it for
/// free-tier accounts.
const FALLBACK_PROJECT_ID: &str = "antigravity-default";

/// Resolve the project id for an account: cache, explicit config, upstream
/// discovery, hard-coded fallback — in that order. Infallible by design;
/// project problems surface later as upstream errors, not here.
pub async fn get_project(
    pool: &AccountPool,
    http: &reqwest::Client,
    account: &Account,
    token: &str,
) -> String {
    if let Some(cached) = pool.cached_project(&account.email).await {
        return cached;
    }

    if let Some(explicit) = &account.project_id {
        pool.cache_project(&account.email, explicit).await;
        return explicit.clone();
    }

    for base in ENDPOINTS {
        match load_code_assist(http, base, token).await {
            Ok(Some(project)) => {
                debug!(account = %account.email, project = %project, "project discovered");
                pool.cache_project(&account.email, &project).await;
                return project;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(endpoint = base, error = %e, "loadCodeAssist failed");
            }
        }
    }

    warn!(account = %account.email, "project discovery failed, using fallback");
    FALLBACK_PROJECT_ID.to_string()
}

async fn load_code_assist(
    http: &reqwest::Client,
    base: &str,
    token: &str,
) -> Result<Option<String>, String> {
    let url = format!("{base}/v1internal:loadCodeAssist");
    let body = json!({"metadata": CLIENT_METADATA.clone()});

    let resp = http
        .post(&url)
        .bearer_auth(token)
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !resp.status().is_success() {
        return Err(format!("status {}", resp.status()));
    }

    let value: Value = resp.json().await.map_err(|e| e.to_string())?;
    Ok(extract_project(&value))
}

/// The field is either a bare string or a nested object with an `id`.
fn extract_project(value: &Value) -> Option<String> {
    match value.get("cloudaicompanionProject") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Object(obj)) => obj
            .get("id")
            .and_then(|id| id.as_str())
            .filter(|id| !id.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_string_project() {
        let value = json!({"cloudaicompanionProject": "projects/abc"});
        assert_eq!(extract_project(&value), Some("projects/abc".to_string()));
    }

    #[test]
    fn extracts_nested_object_project() {
        let value = json!({"cloudaicompanionProject": {"id": "abc", "name": "x"}});
        assert_eq!(extract_project(&value), Some("abc".to_string()));
    }

    #[test]
    fn missing_or_empty_yields_none() {
        assert_eq!(extract_project(&json!({})), None);
        assert_eq!(
            extract_project(&json!({"cloudaicompanionProject": ""})),
            None
        );
        assert_eq!(
            extract_project(&json!({"cloudaicompanionProject": {"id": ""}})),
            None
        );
    }
}
