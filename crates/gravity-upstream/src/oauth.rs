//! OAuth refresh-token exchange against the Google token endpoint.
//!
//! The browser-redirect ceremony that mints the refresh token in the first
//! place lives outside this crate; by the time an account lands in the pool
//! it already carries one.

use serde::Deserialize;
use tracing::debug;

use gravity_core::{GravityError, Result};

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

// Public installed-app OAuth client. Not a secret: every copy of the IDE
// plugin ships the same pair.
const OAUTH_CLIENT_ID: &str =
    "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
const OAUTH_CLIENT_SECRET: &str = "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";

#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_in_secs: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

fn default_expiry() -> u64 {
    3600
}

/// Exchange a refresh token for a fresh access token.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    account_email: &str,
    refresh_token: &str,
) -> Result<RefreshedToken> {
    let resp = client
        .post(GOOGLE_TOKEN_URL)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", OAUTH_CLIENT_ID),
            ("client_secret", OAUTH_CLIENT_SECRET),
        ])
        .send()
        .await
        .map_err(|e| GravityError::Transport(e.to_string()))?;

    if !resp.status().is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(GravityError::AuthInvalid {
            account: account_email.to_string(),
            reason: format!("token refresh failed: {text}"),
        });
    }

    let token: TokenResponse = resp
        .json()
        .await
        .map_err(|e| GravityError::Transport(e.to_string()))?;

    debug!(
        account = %account_email,
        expires_in = token.expires_in,
        "access token refreshed"
    );

    Ok(RefreshedToken {
        access_token: token.access_token,
        expires_in_secs: token.expires_in,
    })
}
