//! Administrative HTTP API.
//!
//! Thin axum surface over the core operations: session snapshots, token
//! block/unblock, node registration, online listing, and heartbeat pings.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{routing::get, routing::post, Json, Router};
use relaygate_core::epoch_secs;
use serde::Deserialize;

use crate::state::ProxyState;

/// Shared state for admin handlers.
#[derive(Clone)]
struct AdminState {
    proxy: Arc<ProxyState>,
    started: Instant,
}

/// Build the admin router.
pub fn admin_routes(proxy: Arc<ProxyState>) -> Router {
    let state = AdminState {
        proxy,
        started: Instant::now(),
    };
    Router::new()
        .route("/stats", get(handle_snapshot))
        .route("/api/tokens", get(handle_snapshot))
        .route("/api/tokens/block", post(handle_block))
        .route("/api/tokens/unblock", post(handle_unblock))
        .route("/api/nodes/register", post(handle_register))
        .route("/api/nodes/online", get(handle_online))
        .route("/api/nodes/ping", post(handle_ping))
        .route("/api/system/stats", get(handle_system_stats))
        .with_state(state)
}

#[derive(Deserialize)]
struct TokenBody {
    token: String,
}

#[derive(Deserialize)]
struct RegisterBody {
    host: String,
    port: u16,
    #[serde(default)]
    residential: bool,
}

#[derive(Deserialize)]
struct PingBody {
    host: String,
    port: u16,
    #[serde(default = "default_online")]
    online: bool,
    #[serde(default)]
    last_checked: Option<i64>,
}

fn default_online() -> bool {
    true
}

async fn handle_snapshot(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.proxy.sessions.snapshot())
}

async fn handle_block(
    State(state): State<AdminState>,
    Json(body): Json<TokenBody>,
) -> impl IntoResponse {
    state.proxy.sessions.block(&body.token);
    Json(serde_json::json!({ "message": format!("Token {} blocked.", body.token) }))
}

async fn handle_unblock(
    State(state): State<AdminState>,
    Json(body): Json<TokenBody>,
) -> impl IntoResponse {
    state.proxy.sessions.unblock(&body.token);
    Json(serde_json::json!({ "message": format!("Token {} unblocked.", body.token) }))
}

async fn handle_register(
    State(state): State<AdminState>,
    Json(body): Json<RegisterBody>,
) -> impl IntoResponse {
    if body.host.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Invalid node data" })),
        );
    }
    match state
        .proxy
        .pool
        .register(&body.host, body.port, body.residential)
        .await
    {
        Ok(node) => (
            StatusCode::OK,
            Json(serde_json::json!({ "message": format!("Node {node} registered.") })),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": err.to_string() })),
        ),
    }
}

async fn handle_online(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.proxy.pool.online_nodes())
}

async fn handle_ping(
    State(state): State<AdminState>,
    Json(body): Json<PingBody>,
) -> impl IntoResponse {
    if body.host.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Invalid ping data" })),
        );
    }
    let timestamp = body.last_checked.unwrap_or_else(epoch_secs);
    match state
        .proxy
        .pool
        .ping(&body.host, body.port, body.online, timestamp)
        .await
    {
        Ok(true) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "message": format!("Node {}:{} pinged.", body.host, body.port)
            })),
        ),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Unknown node" })),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": err.to_string() })),
        ),
    }
}

async fn handle_system_stats(State(state): State<AdminState>) -> impl IntoResponse {
    let snapshot = state.proxy.sessions.snapshot();
    let total_connections: i64 = snapshot.values().map(|s| s.active_connections).sum();
    let bytes_up: u64 = snapshot.values().map(|s| s.bytes_up).sum();
    let bytes_down: u64 = snapshot.values().map(|s| s.bytes_down).sum();

    Json(serde_json::json!({
        "uptime": state.started.elapsed().as_secs(),
        "active_tokens": snapshot.len(),
        "total_connections": total_connections,
        "bytes_up": bytes_up,
        "bytes_down": bytes_down,
        "online_nodes": state.proxy.pool.online_nodes().len(),
        "gateway_nodes": state
            .proxy
            .gateway
            .as_ref()
            .map(|g| g.connected_nodes().len())
            .unwrap_or(0),
    }))
}
