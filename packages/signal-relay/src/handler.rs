//! WebSocket connection handler.
//!
//! One task per connection: assigns the session id, forwards parsed client
//! messages to the relay actor, and writes whatever the relay queues for
//! this session back to the socket.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::protocol::{ClientMessage, ServerMessage, SessionId};
use crate::state::AppState;

/// Handle a single WebSocket connection.
///
/// This function runs for the lifetime of the connection:
/// 1. Registers the session's outbound channel in the session directory
/// 2. Spawns a sender task to forward outbound messages
/// 3. Forwards incoming messages to the relay until the connection closes
/// 4. Reports the disconnect so the relay can clean up
pub async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let session = SessionId::new();

    // ── Step 1: Register Session ──────────────────────────────────────────

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.sessions.insert(session, tx);
    tracing::info!(session = %session, "WebSocket connected");

    // ── Step 2: Spawn Sender Task ─────────────────────────────────────────

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize server message: {}", e);
                }
            }
        }
    });

    // ── Step 3: Process Messages ──────────────────────────────────────────

    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    state.relay.submit(session, client_msg);
                }
                Err(e) => {
                    // Malformed messages are ignored, never answered
                    tracing::warn!(
                        session = %session,
                        error = %e,
                        "Failed to parse client message"
                    );
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!(session = %session, "Client sent close frame");
                break;
            }
            Err(e) => {
                tracing::warn!(session = %session, error = %e, "WebSocket error");
                break;
            }
            _ => {} // Binary, Ping, Pong: axum answers pings itself
        }
    }

    // ── Step 4: Cleanup ───────────────────────────────────────────────────

    state.sessions.remove(session);
    state.relay.disconnected(session);
    sender_task.abort();
    tracing::info!(session = %session, "WebSocket disconnected");
}
