//! The upstream HTTP client: envelope assembly, endpoint failover, the
//! bounded outer retry loop across accounts, and SSE body reading.

use std::sync::{Arc, LazyLock};

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gravity_core::{GravityError, Result};
use gravity_wire::request::BuiltRequest;
use gravity_wire::response::VendorResponse;
use gravity_wire::stream::parse_vendor_sse_line;
use gravity_wire::ModelFamily;

use crate::account::Account;
use crate::pool::{AccountPool, StickyPick};
use crate::project;

/// Daily sandbox first, production second.
pub const ENDPOINTS: &[&str] = &[
    "https://daily-cloudcode-pa.sandbox.googleapis.com",
    "https://cloudcode-pa.googleapis.com",
];

const GENERATE_PATH: &str = "/v1internal:generateContent";
const STREAM_PATH: &str = "/v1internal:streamGenerateContent?alt=sse";

const USER_AGENT: &str = "antigravity/1.11.3 (linux; x64)";
const API_CLIENT_HEADER: &str = "gl-node/22.0.0 antigravity";

/// Claude thinking requests need this protocol opt-in or the upstream
/// rejects interleaved thought parts.
const CLAUDE_THINKING_BETA: &str = "interleaved-thinking-2025-05-14";

/// Sent both as the `Client-Metadata` header and the `loadCodeAssist` body.
pub static CLIENT_METADATA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "ideType": "IDE_UNSPECIFIED",
        "platform": "PLATFORM_UNSPECIFIED",
        "pluginType": "GEMINI",
    })
});

/// A successful upstream exchange: parsed JSON for plain calls, the live
/// response for SSE bodies (client streaming or internal aggregation).
#[derive(Debug)]
pub enum UpstreamResponse {
    Json(VendorResponse),
    Stream(reqwest::Response),
}

pub struct UpstreamClient {
    http: reqwest::Client,
    pool: Arc<AccountPool>,
    max_wait_ms: u64,
}

/// What one endpoint sweep produced when nothing succeeded.
enum SweepFailure {
    /// Every endpoint answered 429; minimum reset across them.
    AllRateLimited(Option<u64>),
    /// Something else broke; the classified last error.
    Other(GravityError),
}

impl UpstreamClient {
    pub fn new(pool: Arc<AccountPool>, max_wait_ms: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            pool,
            max_wait_ms,
        }
    }

    pub fn pool(&self) -> &Arc<AccountPool> {
        &self.pool
    }

    /// Send a converted request upstream, rotating accounts and endpoints
    /// until something succeeds or the attempt budget runs out.
    pub async fn dispatch(
        &self,
        built: &BuiltRequest,
        client_streams: bool,
        cancel: &CancellationToken,
    ) -> Result<UpstreamResponse> {
        // Thinking models only return full content over SSE.
        let use_sse = client_streams || built.thinking;
        let path = if use_sse { STREAM_PATH } else { GENERATE_PATH };

        let max_attempts = std::cmp::max(5, self.pool.len().await + 1);

        for attempt in 0..max_attempts {
            if cancel.is_cancelled() {
                return Err(GravityError::Transport("request cancelled".into()));
            }

            let account = match self.select_account(cancel).await? {
                Some(account) => account,
                None => continue, // slept out a cooldown; re-select
            };

            let token = match self.pool.get_token(&account).await {
                Ok(token) => token,
                Err(e) if e.is_auth_error() => {
                    warn!(account = %account.email, error = %e, "token acquisition failed, rotating");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let project = project::get_project(&self.pool, &self.http, &account, &token).await;

            debug!(
                account = %account.email,
                attempt,
                model = %built.model,
                sse = use_sse,
                "dispatching upstream request"
            );

            match self
                .sweep_endpoints(built, path, &account, &token, &project)
                .await
            {
                Ok(response) => return Ok(response),
                Err(SweepFailure::AllRateLimited(reset_ms)) => {
                    self.pool.mark_rate_limited(&account.email, reset_ms).await;
                    info!(account = %account.email, "rate limited on every endpoint, rotating");
                    continue;
                }
                Err(SweepFailure::Other(e)) => {
                    if e.is_rate_limited() {
                        self.pool.mark_rate_limited(&account.email, None).await;
                        continue;
                    }
                    if e.is_auth_error() {
                        // Caches were already cleared on the 401; the next
                        // attempt refreshes and retries.
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(GravityError::MaxRetries {
            attempts: max_attempts,
        })
    }

    /// Sticky selection plus the waiting policy: sleep through short
    /// cooldowns, fail fast when the whole pool is parked for longer than
    /// the caller would plausibly wait.
    async fn select_account(&self, cancel: &CancellationToken) -> Result<Option<Account>> {
        match self.pool.pick_sticky().await {
            Ok(StickyPick::Account(account)) => Ok(Some(account)),
            Ok(StickyPick::Wait(ms)) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(GravityError::Transport("request cancelled".into())),
                    _ = sleep(Duration::from_millis(ms)) => Ok(None),
                }
            }
            Err(GravityError::NoAccounts { all_rate_limited }) if all_rate_limited => {
                let min_wait = self.pool.min_wait_ms().await.unwrap_or(0);
                if min_wait > self.max_wait_ms {
                    return Err(GravityError::RateLimited {
                        account: None,
                        reset_ms: Some(min_wait),
                    });
                }
                tokio::select! {
                    _ = cancel.cancelled() => Err(GravityError::Transport("request cancelled".into())),
                    _ = sleep(Duration::from_millis(min_wait.max(250))) => Ok(None),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Try every endpoint in order for one account.
    async fn sweep_endpoints(
        &self,
        built: &BuiltRequest,
        path: &str,
        account: &Account,
        token: &str,
        project: &str,
    ) -> std::result::Result<UpstreamResponse, SweepFailure> {
        let envelope = json!({
            "project": project,
            "model": built.model,
            "request": built.payload,
            "userAgent": "antigravity",
            "requestId": format!("agent-{}", uuid::Uuid::new_v4()),
        });

        let mut min_reset: Option<u64> = None;
        let mut rate_limited_count = 0usize;
        let mut failures = 0usize;
        let mut last_error: Option<GravityError> = None;

        for base in ENDPOINTS {
            let url = format!("{base}{path}");
            let mut request = self
                .http
                .post(&url)
                .bearer_auth(token)
                .header("Content-Type", "application/json")
                .header("User-Agent", USER_AGENT)
                .header("X-Goog-Api-Client", API_CLIENT_HEADER)
                .header("Client-Metadata", CLIENT_METADATA.to_string())
                .json(&envelope);
            if built.family == ModelFamily::Claude && built.thinking {
                request = request.header("anthropic-beta", CLAUDE_THINKING_BETA);
            }

            let resp = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(endpoint = base, error = %e, "transport error");
                    failures += 1;
                    last_error = Some(GravityError::Transport(e.to_string()));
                    continue;
                }
            };

            let status = resp.status().as_u16();

            if status == 401 {
                warn!(endpoint = base, account = %account.email, "401, clearing cached credentials");
                self.pool.clear_account_caches(&account.email).await;
                failures += 1;
                last_error = Some(GravityError::Upstream {
                    status,
                    kind: "unauthorized".into(),
                });
                continue;
            }

            if status == 429 {
                let headers = resp.headers().clone();
                let body = resp.text().await.unwrap_or_default();
                let reset = crate::reset::parse_reset(&headers, &body);
                warn!(endpoint = base, reset_ms = ?reset, "429 from upstream");
                min_reset = match (min_reset, reset) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (None, r) => r,
                    (r, None) => r,
                };
                failures += 1;
                rate_limited_count += 1;
                last_error = Some(GravityError::RateLimited {
                    account: Some(account.email.clone()),
                    reset_ms: reset,
                });
                continue;
            }

            if status >= 400 {
                let body = resp.text().await.unwrap_or_default();
                warn!(endpoint = base, status, body = %body, "upstream error");
                failures += 1;
                last_error = Some(GravityError::Upstream { status, kind: body });
                continue;
            }

            if path == GENERATE_PATH {
                let mut value: Value = match resp.json().await {
                    Ok(value) => value,
                    Err(e) => {
                        failures += 1;
                        last_error = Some(GravityError::Transport(e.to_string()));
                        continue;
                    }
                };
                // v1internal wraps the payload in an outer `response` field.
                if let Some(inner) = value.get_mut("response") {
                    value = inner.take();
                }
                match serde_json::from_value::<VendorResponse>(value) {
                    Ok(parsed) => return Ok(UpstreamResponse::Json(parsed)),
                    Err(e) => {
                        failures += 1;
                        last_error = Some(GravityError::Transport(format!(
                            "unparseable upstream response: {e}"
                        )));
                        continue;
                    }
                }
            }

            return Ok(UpstreamResponse::Stream(resp));
        }

        if failures > 0 && rate_limited_count == failures {
            return Err(SweepFailure::AllRateLimited(min_reset));
        }
        Err(SweepFailure::Other(last_error.unwrap_or_else(|| {
            GravityError::Transport("no endpoints configured".into())
        })))
    }
}

/// Read an SSE body and feed parsed vendor chunks down a channel. Carries a
/// line buffer across network chunks; per-line parse errors are skipped so
/// one mangled event never kills the stream. Stops when the receiver hangs
/// up (client disconnect) or the body ends.
pub async fn pump_sse(resp: reqwest::Response, tx: mpsc::Sender<VendorResponse>) {
    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "upstream stream read failed");
                return;
            }
        };
        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(parsed) = parse_vendor_sse_line(line) {
                if tx.send(parsed).await.is_err() {
                    return; // receiver dropped, stop reading
                }
            }
        }

        line_buf = remainder;
    }
}
