//! GET /health — liveness plus a peek at pool and request state. Exempt
//! from API-key auth so probes and dashboards can reach it.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "accounts": state.pool.len().await,
        "all_rate_limited": state.pool.is_all_rate_limited().await,
        "cached_signatures": state.signatures.len(),
        "recent_requests": state.history.recent(10),
    }))
}
