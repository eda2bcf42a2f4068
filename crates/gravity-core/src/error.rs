use thiserror::Error;

/// Errors produced anywhere between the front-end handlers and the upstream
/// wire. Classification drives the retry loop: rate-limit and auth errors
/// rotate accounts, transport errors rotate endpoints, the rest abort.
#[derive(Debug, Error)]
pub enum GravityError {
    #[error("rate limited (account {account:?}, reset in {reset_ms:?} ms)")]
    RateLimited {
        account: Option<String>,
        /// Remaining cooldown in milliseconds, when the upstream told us.
        reset_ms: Option<u64>,
    },

    #[error("auth invalid for {account}: {reason}")]
    AuthInvalid { account: String, reason: String },

    #[error("no accounts available (all_rate_limited: {all_rate_limited})")]
    NoAccounts { all_rate_limited: bool },

    #[error("giving up after {attempts} attempts")]
    MaxRetries { attempts: usize },

    #[error("upstream error {status}: {kind}")]
    Upstream { status: u16, kind: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GravityError {
    /// True when switching accounts (or waiting out a cooldown) may help.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            GravityError::RateLimited { .. } => true,
            GravityError::Upstream { status, kind } => {
                *status == 429 || text_looks_rate_limited(kind)
            }
            GravityError::Transport(msg) => text_looks_rate_limited(msg),
            _ => false,
        }
    }

    /// True when the credential itself is bad — retrying on the same account
    /// is pointless until a refresh succeeds.
    pub fn is_auth_error(&self) -> bool {
        match self {
            GravityError::AuthInvalid { .. } => true,
            GravityError::Upstream { status, kind } => {
                *status == 401 || text_looks_auth_invalid(kind)
            }
            GravityError::Transport(msg) => text_looks_auth_invalid(msg),
            _ => false,
        }
    }

    /// True when the same request may succeed on another endpoint or attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            GravityError::RateLimited { .. } => true,
            GravityError::Transport(_) => true,
            GravityError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status surfaced to the client. Rate limits deliberately map to
    /// 400 so well-behaved clients do not auto-retry the proxy into a storm.
    pub fn http_status(&self) -> u16 {
        match self {
            GravityError::AuthInvalid { .. } => 401,
            GravityError::RateLimited { .. } => 400,
            GravityError::NoAccounts { all_rate_limited: true } => 400,
            GravityError::NoAccounts { .. } => 503,
            GravityError::BadRequest(_) => 400,
            GravityError::Upstream { status: 403, .. } => 403,
            GravityError::MaxRetries { .. } => 503,
            GravityError::Upstream { status, .. } if *status >= 400 && *status < 500 => *status,
            _ => 500,
        }
    }

    /// Machine-readable error type string used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            GravityError::RateLimited { .. } => "rate_limit_error",
            GravityError::AuthInvalid { .. } => "authentication_error",
            GravityError::NoAccounts { .. } => "overloaded_error",
            GravityError::MaxRetries { .. } => "overloaded_error",
            GravityError::Upstream { status: 403, .. } => "permission_error",
            GravityError::Upstream { .. } => "api_error",
            GravityError::Transport(_) => "api_error",
            GravityError::BadRequest(_) => "invalid_request_error",
            GravityError::Config(_) => "api_error",
            GravityError::Serialization(_) => "invalid_request_error",
            GravityError::Io(_) => "api_error",
        }
    }
}

/// Legacy text classifier. The upstream sometimes embeds error codes in free
/// text instead of structured fields, so status-code checks alone miss them.
pub fn text_looks_rate_limited(text: &str) -> bool {
    let upper = text.to_uppercase();
    upper.contains("429")
        || upper.contains("RESOURCE_EXHAUSTED")
        || upper.contains("QUOTA_EXHAUSTED")
        || upper.contains("RATE LIMIT")
}

/// Legacy text classifier for credential failures surfaced as free text.
pub fn text_looks_auth_invalid(text: &str) -> bool {
    let upper = text.to_uppercase();
    upper.contains("INVALID_GRANT")
        || upper.contains("TOKEN REFRESH FAILED")
        || upper.contains("UNAUTHENTICATED")
}

pub type Result<T> = std::result::Result<T, GravityError>;
