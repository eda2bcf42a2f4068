use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use gravity_core::config::GravityConfig;
use gravity_upstream::{AccountPool, UpstreamClient};
use gravity_wire::SignatureCache;

use crate::history::RequestHistory;
use crate::throttle::Throttle;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: GravityConfig,
    pub api_key: String,
    pub pool: Arc<AccountPool>,
    pub upstream: UpstreamClient,
    pub signatures: Arc<SignatureCache>,
    pub throttle: Throttle,
    pub history: RequestHistory,
}

impl AppState {
    pub async fn new(config: GravityConfig, api_key: String) -> anyhow::Result<Self> {
        let pool = Arc::new(AccountPool::new(&config.pool, None));
        pool.load().await?;
        let upstream =
            UpstreamClient::new(pool.clone(), config.pool.max_wait_before_error_ms);
        Ok(Self {
            throttle: Throttle::new(config.throttle.clone()),
            config,
            api_key,
            pool,
            upstream,
            signatures: Arc::new(SignatureCache::new()),
            history: RequestHistory::new(100),
        })
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/v1/messages", post(crate::http::messages::messages_handler))
        .route(
            "/v1/messages/count_tokens",
            post(crate::http::models::count_tokens_handler),
        )
        .route("/v1/models", get(crate::http::models::list_models_handler))
        .route(
            "/chat/completions",
            post(crate::http::openai_compat::chat_completions),
        )
        .route(
            "/v1/chat/completions",
            post(crate::http::openai_compat::chat_completions),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_api_key,
        ))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
