//! Server state.
//!
//! The call, presence and room registries live inside the relay actor and
//! are never shared. What is shared between connection tasks is the session
//! directory: session id → outbound channel, in a `DashMap` so that writers
//! and the actor never contend on a single lock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::actor::RelayHandle;
use crate::protocol::{ServerMessage, SessionId};
use crate::relay::Outbox;

/// Default seconds a call may ring before it times out.
const DEFAULT_RING_TIMEOUT_SECS: u64 = 45;

/// Default seconds a finished call is remembered (to drop late messages).
const DEFAULT_CALL_RETENTION_SECS: i64 = 300;

/// Default seconds between sweeps of finished calls.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Default maximum sessions per group room.
const DEFAULT_MAX_GROUP_SIZE: usize = 50;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    /// 0 disables the ring timeout
    pub ring_timeout_secs: u64,
    pub call_retention_secs: i64,
    pub sweep_interval_secs: u64,
    pub max_group_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            ring_timeout_secs: DEFAULT_RING_TIMEOUT_SECS,
            call_retention_secs: DEFAULT_CALL_RETENTION_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            max_group_size: DEFAULT_MAX_GROUP_SIZE,
        }
    }
}

/// A connected client's sender channel.
pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

/// Session id → sender channel for every open connection.
#[derive(Clone, Default)]
pub struct SessionDirectory {
    senders: Arc<DashMap<SessionId, ClientSender>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: SessionId, sender: ClientSender) {
        self.senders.insert(session, sender);
    }

    pub fn remove(&self, session: SessionId) {
        self.senders.remove(&session);
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

impl Outbox for SessionDirectory {
    fn deliver(&self, session: SessionId, message: ServerMessage) -> bool {
        match self.senders.get(&session) {
            Some(sender) => sender.send(message).is_ok(),
            None => {
                tracing::debug!(session = %session, "Session gone, message dropped");
                false
            }
        }
    }
}

/// Shared application state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionDirectory,
    pub relay: RelayHandle,
    pub config: RelayConfig,
}

impl AppState {
    /// Start the relay actor and build the state around it.
    pub fn start(config: RelayConfig) -> Self {
        let sessions = SessionDirectory::new();
        let relay = crate::actor::spawn(config.clone(), sessions.clone());
        Self {
            sessions,
            relay,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CallId;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.ring_timeout_secs, 45);
        assert_eq!(config.call_retention_secs, 300);
        assert_eq!(config.sweep_interval_secs, 60);
        assert_eq!(config.max_group_size, 50);
    }

    #[test]
    fn test_deliver_to_open_session() {
        let sessions = SessionDirectory::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = SessionId::new();
        sessions.insert(session, tx);

        assert!(sessions.deliver(session, ServerMessage::Pong));
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::Pong);
    }

    #[test]
    fn test_deliver_to_missing_session_returns_false() {
        let sessions = SessionDirectory::new();
        let sent = sessions.deliver(
            SessionId::new(),
            ServerMessage::CallEnded {
                call_id: CallId::new("c1"),
            },
        );
        assert!(!sent);
    }

    #[test]
    fn test_deliver_after_receiver_dropped() {
        let sessions = SessionDirectory::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let session = SessionId::new();
        sessions.insert(session, tx);
        drop(rx);

        assert!(!sessions.deliver(session, ServerMessage::Pong));
    }

    #[test]
    fn test_insert_and_remove() {
        let sessions = SessionDirectory::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = SessionId::new();

        sessions.insert(session, tx);
        assert_eq!(sessions.len(), 1);

        sessions.remove(session);
        assert!(sessions.is_empty());
        assert!(!sessions.deliver(session, ServerMessage::Pong));
    }
}
