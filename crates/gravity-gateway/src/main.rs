use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

mod app;
mod auth;
mod history;
mod http;
mod throttle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gravity=info,gravity_upstream=info,tower_http=warn".into()),
        )
        .init();

    // load config: explicit path > GRAVITY_CONFIG env > ~/.gravity/gravity.toml
    let config_path = std::env::var("GRAVITY_CONFIG").ok();
    let config = gravity_core::config::GravityConfig::load(config_path.as_deref())
        .unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            gravity_core::config::GravityConfig::default()
        });

    let api_key = auth::resolve_api_key(&config.server)?;

    let bind = config.server.bind.clone();
    let port = config.server.port;
    let state = Arc::new(app::AppState::new(config, api_key).await?);
    let router = app::build_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Gravity proxy listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
