use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Wire-level constants shared across crates.
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Cooldown applied when the upstream rate-limits us without a reset hint.
pub const DEFAULT_COOLDOWN_MS: u64 = 60_000;
/// Hard cap on how long a request will wait for a cooling-down account.
pub const MAX_WAIT_BEFORE_ERROR_MS: u64 = 120_000;
/// Cached access tokens are refreshed after this many seconds.
pub const TOKEN_REFRESH_SECS: u64 = 300;
/// Thought signatures are recoverable from the cache for this long.
pub const SIGNATURE_TTL_SECS: u64 = 2 * 60 * 60;

/// Prefix clients prepend to model names when routing through the proxy.
/// Stripped before the name reaches the upstream.
pub const MODEL_PREFIX: &str = "antigravity-";

/// Server API keys look like `ag_<64 hex chars>`.
pub const API_KEY_PREFIX: &str = "ag_";

/// Top-level config (gravity.toml + GRAVITY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GravityConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

impl Default for GravityConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            pool: PoolConfig::default(),
            throttle: ThrottleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// API key clients must present. Generated and persisted to
    /// `api_key_path` on first boot when absent here and in the env.
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_path")]
    pub api_key_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            api_key: None,
            api_key_path: default_api_key_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Where the account pool persists its state.
    #[serde(default = "default_accounts_path")]
    pub accounts_path: String,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_before_error_ms: u64,
    #[serde(default = "default_token_refresh_secs")]
    pub token_refresh_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            accounts_path: default_accounts_path(),
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            max_wait_before_error_ms: MAX_WAIT_BEFORE_ERROR_MS,
            token_refresh_secs: TOKEN_REFRESH_SECS,
        }
    }
}

/// Minimum spacing between consecutive upstream dispatches, per model family.
/// Keeps a single account from burning through its quota in bursts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "default_claude_delay_ms")]
    pub claude_ms: u64,
    #[serde(default = "default_gemini_delay_ms")]
    pub gemini_ms: u64,
    #[serde(default = "default_other_delay_ms")]
    pub other_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            claude_ms: default_claude_delay_ms(),
            gemini_ms: default_gemini_delay_ms(),
            other_ms: default_other_delay_ms(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_api_key_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.gravity/api_key", home)
}
fn default_accounts_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.gravity/accounts.json", home)
}
fn default_cooldown_ms() -> u64 {
    DEFAULT_COOLDOWN_MS
}
fn default_max_wait_ms() -> u64 {
    MAX_WAIT_BEFORE_ERROR_MS
}
fn default_token_refresh_secs() -> u64 {
    TOKEN_REFRESH_SECS
}
fn default_claude_delay_ms() -> u64 {
    3000
}
fn default_gemini_delay_ms() -> u64 {
    1500
}
fn default_other_delay_ms() -> u64 {
    3000
}

impl GravityConfig {
    /// Load config from a TOML file with GRAVITY_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.gravity/gravity.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: GravityConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("GRAVITY_").split("_"))
            .extract()
            .map_err(|e| crate::error::GravityError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Generate a fresh server API key: `ag_` + 64 hex chars.
    pub fn generate_api_key() -> String {
        let a = uuid::Uuid::new_v4().simple().to_string();
        let b = uuid::Uuid::new_v4().simple().to_string();
        format!("{API_KEY_PREFIX}{a}{b}")
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.gravity/gravity.toml", home)
}
