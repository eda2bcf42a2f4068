//! Account records and the on-disk pool format.
//!
//! The JSON layout mirrors what older deployments already have on disk, so
//! field names stay camelCase and optional fields are omitted when unset.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use gravity_core::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    /// Long-lived OAuth refresh token, exchanged for short-lived access tokens.
    Oauth,
    /// Static API key pasted in by the operator.
    Manual,
    /// Token extracted from a local IDE state store on demand.
    Database,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub email: String,
    pub source: CredentialSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<i64>,
    #[serde(default)]
    pub is_rate_limited: bool,
    /// Epoch millis when the cooldown lapses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_reset_time: Option<i64>,
    #[serde(default)]
    pub is_invalid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_at: Option<i64>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,
}

impl Account {
    pub fn available(&self) -> bool {
        !self.is_rate_limited && !self.is_invalid && !self.disabled
    }

    /// Milliseconds of cooldown left, zero when none.
    pub fn remaining_cooldown_ms(&self, now_ms: i64) -> u64 {
        if !self.is_rate_limited {
            return 0;
        }
        match self.rate_limit_reset_time {
            Some(reset) if reset > now_ms => (reset - now_ms) as u64,
            _ => 0,
        }
    }

    /// Clear the rate-limit mark once its reset time has passed.
    /// Returns true when state changed.
    pub fn clear_expired_limit(&mut self, now_ms: i64) -> bool {
        if self.is_rate_limited && self.remaining_cooldown_ms(now_ms) == 0 {
            self.is_rate_limited = false;
            self.rate_limit_reset_time = None;
            return true;
        }
        false
    }
}

/// The persisted pool file: `{accounts, settings, activeIndex}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountsFile {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub active_index: usize,
}

/// Seam for the `database` credential source. Reading the IDE's local state
/// store (SQLite) is the enclosing process's business; the pool only needs
/// something that yields a token for a path.
#[async_trait]
pub trait DatabaseTokenSource: Send + Sync {
    async fn extract_token(&self, db_path: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn persisted_field_names_are_camel_case() {
        let account = Account {
            email: "a@b.c".into(),
            source: CredentialSource::Oauth,
            refresh_token: Some("rt".into()),
            api_key: None,
            db_path: None,
            project_id: Some("proj".into()),
            added_at: Some(1),
            is_rate_limited: true,
            rate_limit_reset_time: Some(99),
            is_invalid: false,
            invalid_reason: None,
            invalid_at: None,
            disabled: false,
            last_used: Some(2),
        };
        let value = serde_json::to_value(&account).unwrap();
        assert_eq!(value["source"], "oauth");
        assert_eq!(value["refreshToken"], "rt");
        assert_eq!(value["projectId"], "proj");
        assert_eq!(value["isRateLimited"], true);
        assert_eq!(value["rateLimitResetTime"], 99);
        assert_eq!(value["lastUsed"], 2);
        // unset optionals stay off the wire
        assert!(value.get("apiKey").is_none());
        assert!(value.get("dbPath").is_none());
    }

    #[test]
    fn file_round_trip_with_defaults() {
        let file: AccountsFile = serde_json::from_value(json!({
            "accounts": [{"email": "x@y.z", "source": "manual", "apiKey": "k"}]
        }))
        .unwrap();
        assert_eq!(file.accounts.len(), 1);
        assert_eq!(file.active_index, 0);
        assert!(file.accounts[0].available());
    }

    #[test]
    fn availability_and_cooldowns() {
        let mut account: Account = serde_json::from_value(json!({
            "email": "a@b.c", "source": "manual", "apiKey": "k",
            "isRateLimited": true, "rateLimitResetTime": 10_000
        }))
        .unwrap();

        assert!(!account.available());
        assert_eq!(account.remaining_cooldown_ms(4_000), 6_000);

        // not yet elapsed: nothing changes
        assert!(!account.clear_expired_limit(4_000));
        assert!(account.is_rate_limited);

        // elapsed: mark clears
        assert!(account.clear_expired_limit(10_000));
        assert!(account.available());
        assert!(account.rate_limit_reset_time.is_none());
    }
}
