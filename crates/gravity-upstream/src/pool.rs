//! The account pool: sticky selection with cooldown-aware failover, token
//! and project caches, and best-effort persistence.
//!
//! One mutex covers selection and mutation. Persistence snapshots the state
//! under the lock and writes outside it, so a slow disk never stalls a
//! request. Token refreshes (HTTP) also run outside the lock with a
//! re-check on completion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use gravity_core::config::PoolConfig;
use gravity_core::{GravityError, Result};

use crate::account::{Account, AccountsFile, CredentialSource, DatabaseTokenSource};
use crate::oauth;

struct CachedToken {
    token: String,
    issued_at: Instant,
}

struct PoolInner {
    accounts: Vec<Account>,
    active_index: usize,
    settings: serde_json::Value,
    tokens: HashMap<String, CachedToken>,
    projects: HashMap<String, String>,
}

impl PoolInner {
    fn clear_expired_limits(&mut self) -> bool {
        let now = Utc::now().timestamp_millis();
        let mut changed = false;
        for account in &mut self.accounts {
            changed |= account.clear_expired_limit(now);
        }
        changed
    }

    fn snapshot(&self) -> AccountsFile {
        AccountsFile {
            accounts: self.accounts.clone(),
            settings: self.settings.clone(),
            active_index: self.active_index,
        }
    }

    fn find_mut(&mut self, email: &str) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| a.email == email)
    }
}

/// Outcome of sticky selection.
#[derive(Debug, Clone)]
pub enum StickyPick {
    /// Use this account.
    Account(Account),
    /// The current account is cooling down but worth waiting for (keeps
    /// upstream cache affinity); sleep this long and select again.
    Wait(u64),
}

pub struct AccountPool {
    inner: Mutex<PoolInner>,
    path: String,
    http: reqwest::Client,
    cooldown_ms: u64,
    max_wait_ms: u64,
    token_refresh: Duration,
    db_source: Option<Arc<dyn DatabaseTokenSource>>,
}

impl AccountPool {
    pub fn new(config: &PoolConfig, db_source: Option<Arc<dyn DatabaseTokenSource>>) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                accounts: Vec::new(),
                active_index: 0,
                settings: serde_json::Value::Object(Default::default()),
                tokens: HashMap::new(),
                projects: HashMap::new(),
            }),
            path: config.accounts_path.clone(),
            http: reqwest::Client::new(),
            cooldown_ms: config.cooldown_ms,
            max_wait_ms: config.max_wait_before_error_ms,
            token_refresh: Duration::from_secs(config.token_refresh_secs),
            db_source,
        }
    }

    /// Load the persisted pool file. A missing file is an empty pool, not
    /// an error; a corrupt file is.
    pub async fn load(&self) -> Result<usize> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path, "no account file yet, starting empty");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        let file: AccountsFile = serde_json::from_str(&data)?;

        let mut inner = self.inner.lock().await;
        inner.active_index = if file.accounts.is_empty() {
            0
        } else {
            file.active_index.min(file.accounts.len() - 1)
        };
        inner.accounts = file.accounts;
        inner.settings = file.settings;
        info!(accounts = inner.accounts.len(), "account pool loaded");
        Ok(inner.accounts.len())
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.accounts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // ── Selection ────────────────────────────────────────────────────────────

    /// Sticky selection: prefer the current account for upstream cache
    /// affinity, tolerating a short cooldown; otherwise advance.
    pub async fn pick_sticky(&self) -> Result<StickyPick> {
        let mut inner = self.inner.lock().await;
        let changed = inner.clear_expired_limits();

        if inner.accounts.is_empty() {
            return Err(GravityError::NoAccounts {
                all_rate_limited: false,
            });
        }

        let idx = inner.active_index.min(inner.accounts.len() - 1);
        inner.active_index = idx;
        let now = Utc::now().timestamp_millis();

        let current = &inner.accounts[idx];
        if current.available() {
            let pick = current.clone();
            if changed {
                self.persist(&inner);
            }
            return Ok(StickyPick::Account(pick));
        }

        // A short cooldown on the sticky account is worth sleeping through.
        let wait = current.remaining_cooldown_ms(now);
        if current.is_rate_limited && !current.is_invalid && !current.disabled && wait > 0 && wait <= self.max_wait_ms {
            debug!(account = %current.email, wait_ms = wait, "waiting out sticky cooldown");
            return Ok(StickyPick::Wait(wait));
        }

        match self.advance_locked(&mut inner) {
            Some(account) => Ok(StickyPick::Account(account)),
            None => Err(GravityError::NoAccounts {
                all_rate_limited: Self::all_rate_limited_locked(&inner),
            }),
        }
    }

    /// Linear probe to the next available account.
    pub async fn pick_next(&self) -> Result<Account> {
        let mut inner = self.inner.lock().await;
        inner.clear_expired_limits();
        if inner.accounts.is_empty() {
            return Err(GravityError::NoAccounts {
                all_rate_limited: false,
            });
        }
        match self.advance_locked(&mut inner) {
            Some(account) => Ok(account),
            None => Err(GravityError::NoAccounts {
                all_rate_limited: Self::all_rate_limited_locked(&inner),
            }),
        }
    }

    fn advance_locked(&self, inner: &mut PoolInner) -> Option<Account> {
        let len = inner.accounts.len();
        for offset in 1..=len {
            let idx = (inner.active_index + offset) % len;
            if inner.accounts[idx].available() {
                inner.active_index = idx;
                inner.accounts[idx].last_used = Some(Utc::now().timestamp_millis());
                let pick = inner.accounts[idx].clone();
                info!(account = %pick.email, "switched active account");
                self.persist(inner);
                return Some(pick);
            }
        }
        None
    }

    fn all_rate_limited_locked(inner: &PoolInner) -> bool {
        !inner.accounts.is_empty() && inner.accounts.iter().all(|a| a.is_rate_limited)
    }

    pub async fn is_all_rate_limited(&self) -> bool {
        let mut inner = self.inner.lock().await;
        inner.clear_expired_limits();
        Self::all_rate_limited_locked(&inner)
    }

    /// Smallest remaining cooldown across rate-limited accounts.
    pub async fn min_wait_ms(&self) -> Option<u64> {
        let inner = self.inner.lock().await;
        let now = Utc::now().timestamp_millis();
        inner
            .accounts
            .iter()
            .filter(|a| a.is_rate_limited)
            .map(|a| a.remaining_cooldown_ms(now))
            .min()
    }

    // ── State transitions ────────────────────────────────────────────────────

    pub async fn mark_rate_limited(&self, email: &str, reset_ms: Option<u64>) {
        let mut inner = self.inner.lock().await;
        let cooldown = reset_ms.unwrap_or(self.cooldown_ms);
        if let Some(account) = inner.find_mut(email) {
            account.is_rate_limited = true;
            account.rate_limit_reset_time = Some(Utc::now().timestamp_millis() + cooldown as i64);
            warn!(account = %email, cooldown_ms = cooldown, "account rate limited");
        }
        self.persist(&inner);
    }

    pub async fn mark_invalid(&self, email: &str, reason: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(account) = inner.find_mut(email) {
            account.is_invalid = true;
            account.invalid_reason = Some(reason.to_string());
            account.invalid_at = Some(Utc::now().timestamp_millis());
            warn!(account = %email, reason, "account marked invalid");
        }
        inner.tokens.remove(email);
        self.persist(&inner);
    }

    /// Optimistic recovery: the front-end calls this when every account is
    /// marked at the start of a request, on the theory that limits may have
    /// lifted upstream even if the timers have not.
    pub async fn reset_all_rate_limits(&self) {
        let mut inner = self.inner.lock().await;
        for account in &mut inner.accounts {
            account.is_rate_limited = false;
            account.rate_limit_reset_time = None;
        }
        info!("cleared all rate-limit marks");
        self.persist(&inner);
    }

    /// Drop the cached token and project for an account (after a 401).
    pub async fn clear_account_caches(&self, email: &str) {
        let mut inner = self.inner.lock().await;
        inner.tokens.remove(email);
        inner.projects.remove(email);
        debug!(account = %email, "cleared token and project caches");
    }

    pub async fn cache_project(&self, email: &str, project: &str) {
        let mut inner = self.inner.lock().await;
        inner.projects.insert(email.to_string(), project.to_string());
    }

    pub async fn cached_project(&self, email: &str) -> Option<String> {
        self.inner.lock().await.projects.get(email).cloned()
    }

    // ── Token acquisition ────────────────────────────────────────────────────

    /// Access token for an account: cached while fresh, otherwise refreshed
    /// per the credential source. A successful refresh also clears any
    /// invalid mark; a failed one sets it.
    pub async fn get_token(&self, account: &Account) -> Result<String> {
        {
            let inner = self.inner.lock().await;
            if let Some(cached) = inner.tokens.get(&account.email) {
                if cached.issued_at.elapsed() < self.token_refresh {
                    return Ok(cached.token.clone());
                }
            }
        }

        match account.source {
            CredentialSource::Manual => {
                account.api_key.clone().ok_or_else(|| GravityError::AuthInvalid {
                    account: account.email.clone(),
                    reason: "manual account without api key".into(),
                })
            }
            CredentialSource::Oauth => {
                let refresh_token =
                    account
                        .refresh_token
                        .as_deref()
                        .ok_or_else(|| GravityError::AuthInvalid {
                            account: account.email.clone(),
                            reason: "oauth account without refresh token".into(),
                        })?;
                match oauth::refresh_access_token(&self.http, &account.email, refresh_token).await {
                    Ok(refreshed) => {
                        let mut inner = self.inner.lock().await;
                        inner.tokens.insert(
                            account.email.clone(),
                            CachedToken {
                                token: refreshed.access_token.clone(),
                                issued_at: Instant::now(),
                            },
                        );
                        // A working refresh clears a stale invalid mark.
                        if let Some(stored) = inner.find_mut(&account.email) {
                            if stored.is_invalid {
                                stored.is_invalid = false;
                                stored.invalid_reason = None;
                                stored.invalid_at = None;
                                info!(account = %account.email, "invalid mark cleared after refresh");
                            }
                        }
                        self.persist(&inner);
                        Ok(refreshed.access_token)
                    }
                    Err(e) => {
                        self.mark_invalid(&account.email, &e.to_string()).await;
                        Err(e)
                    }
                }
            }
            CredentialSource::Database => {
                let db_path =
                    account
                        .db_path
                        .as_deref()
                        .ok_or_else(|| GravityError::AuthInvalid {
                            account: account.email.clone(),
                            reason: "database account without db path".into(),
                        })?;
                let source = self.db_source.as_ref().ok_or_else(|| {
                    GravityError::AuthInvalid {
                        account: account.email.clone(),
                        reason: "no database token source configured".into(),
                    }
                })?;
                match source.extract_token(db_path).await {
                    Ok(token) => {
                        let mut inner = self.inner.lock().await;
                        inner.tokens.insert(
                            account.email.clone(),
                            CachedToken {
                                token: token.clone(),
                                issued_at: Instant::now(),
                            },
                        );
                        Ok(token)
                    }
                    Err(e) => {
                        self.mark_invalid(&account.email, &e.to_string()).await;
                        Err(e)
                    }
                }
            }
        }
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    /// Snapshot under the lock, write outside it. Failures are logged and
    /// swallowed: a broken disk must not take requests down with it.
    fn persist(&self, inner: &PoolInner) {
        let snapshot = inner.snapshot();
        let path = self.path.clone();
        tokio::spawn(async move {
            if let Err(e) = write_atomic(&path, &snapshot).await {
                warn!(path = %path, error = %e, "failed to persist account pool");
            }
        });
    }
}

async fn write_atomic(path: &str, file: &AccountsFile) -> Result<()> {
    let json = serde_json::to_string_pretty(file)?;
    if let Some(parent) = std::path::Path::new(path).parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    let tmp = format!("{path}.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
