//! Forum API behind the gate.
//!
//! ```sh
//! QUOTA_GATE_TOKEN__HMAC_SECRET=dev-secret cargo run --example gateway
//! # RUST_LOG=quota_gate=debug for per-request decisions
//! ```
//!
//! Routes come from `demos/gateway.toml`: `/api/v1` requires a token,
//! `/api/v1/auth` is public but still counted per client address.
//!
//! Set `QUOTA_GATE_STORE__URL=redis://127.0.0.1/` and build with
//! `--features redis-storage` to share quotas between instances.

use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use quota_gate::{
    gate_middleware, GateConfig, InMemoryQuotaStore, QuotaStore, RequestGate, RequestIdentity,
    SystemClock, TokenValidator,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

async fn list_topics(Extension(identity): Extension<RequestIdentity>) -> Json<Value> {
    let viewer = identity
        .identity()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "anonymous".to_string());
    Json(json!({ "viewer": viewer, "topics": [] }))
}

async fn login() -> Json<Value> {
    Json(json!({ "message": "issue tokens here" }))
}

async fn health() -> &'static str {
    "ok"
}

async fn store(config: &GateConfig) -> Result<Arc<dyn QuotaStore>, Box<dyn std::error::Error>> {
    #[cfg(feature = "redis-storage")]
    if let Some(url) = &config.store.url {
        let store =
            quota_gate::RedisQuotaStore::connect_with_config(url, config.redis_store()).await?;
        tracing::info!(url = %url, "using redis quota store");
        return Ok(Arc::new(store));
    }

    if config.store.url.is_some() {
        tracing::warn!("store.url is set but redis support is not compiled in, counting in-process");
    }
    Ok(Arc::new(InMemoryQuotaStore::new(Arc::new(SystemClock::new()))))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GateConfig::load(Some(Path::new(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/demos/gateway.toml"
    ))))?;
    tracing::info!(?config, "configuration loaded");

    let validator = config.token.validator()?;
    let gate = config
        .apply(RequestGate::builder(store(&config).await?, validator))
        .build()?;

    let app = Router::new()
        .route("/api/v1/topics", get(list_topics))
        .route("/api/v1/auth/login", post(login))
        .route("/health", get(health))
        .layer(middleware::from_fn_with_state(
            Arc::new(gate),
            gate_middleware::<Arc<dyn QuotaStore>, TokenValidator>,
        ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!(addr = %listener.local_addr()?, "gateway listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
