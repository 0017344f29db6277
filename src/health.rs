/// Liveness and readiness endpoints
///
/// `/health` always answers while the process runs; `/ready` answers 503
/// until both the broker and the store are connected.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::ingest::BridgeContext;

const SERVICE_NAME: &str = "smartbin-bridge";

pub fn router(ctx: BridgeContext) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

pub async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    let listener = TcpListener::bind((host, port)).await?;
    tracing::info!("Health server listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Serve until `cancel` fires
pub async fn serve(listener: TcpListener, ctx: BridgeContext, cancel: CancellationToken) -> Result<()> {
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}

/// Health check endpoint (liveness)
async fn health_check(State(ctx): State<BridgeContext>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "messages": ctx.stats().snapshot(),
    }))
}

/// Readiness check endpoint - broker connected and store reachable
async fn readiness_check(
    State(ctx): State<BridgeContext>,
) -> std::result::Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let status = ctx.status();
    let body = serde_json::json!({
        "service": SERVICE_NAME,
        "broker": if status.broker_connected() { "connected" } else { "disconnected" },
        "store": if status.store_reachable() { "reachable" } else { "unreachable" },
    });

    if status.is_ready() {
        Ok(Json(body))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(body)))
    }
}
