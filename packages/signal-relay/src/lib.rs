//! WebRTC call signaling relay.
//!
//! Clients connect over WebSocket, bind a user id with `join`, and exchange
//! opaque SDP / ICE payloads addressed by user id. The relay routes them,
//! tracks each 1:1 call's state, and keeps group rooms so that late joiners
//! are announced to everyone already in the room.
//!
//! The relay never looks inside a signal payload.

pub mod actor;
pub mod call;
pub mod client;
pub mod error;
pub mod handler;
mod lifecycle;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod rooms;
pub mod state;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::Method,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::{AppState, RelayConfig};

/// Build the HTTP router: the WebSocket endpoint plus health and stats.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/info", get(info_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// WebSocket upgrade handler for client connections.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handler::handle_websocket(socket, state))
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "signal-relay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Statistics endpoint.
async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.relay.stats().await.unwrap_or_default();
    Json(json!({
        "online_sessions": state.sessions.len(),
        "registered_users": stats.registered_users,
        "ringing_calls": stats.ringing_calls,
        "active_calls": stats.active_calls,
        "group_rooms": stats.group_rooms,
    }))
}

/// Server info endpoint. Also useful for client-side ping measurement.
async fn info_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "service": "signal-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "ring_timeout_secs": state.config.ring_timeout_secs,
        "max_group_size": state.config.max_group_size,
        "timestamp": chrono::Utc::now().timestamp_millis(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
