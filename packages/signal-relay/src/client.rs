//! Client side of the signaling protocol.
//!
//! [`CallTracker`] is the state a calling client keeps: which calls it knows
//! about and where each one stands. It is what makes relay events safe to
//! act on. Any event for a call the tracker never saw, or has already closed,
//! is discarded. That covers the crossed-wires case where the callee accepts
//! just as the caller hangs up.
//!
//! [`RelayClient`] is a thin async WebSocket connection speaking
//! [`ClientMessage`] / [`ServerMessage`].

use std::collections::{HashMap, HashSet};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::call::{CallEvent, CallState};
use crate::error::ClientResult;
use crate::protocol::{CallId, ClientMessage, ServerMessage, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedCall {
    pub peer: UserId,
    pub direction: Direction,
    pub state: CallState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Rejected,
    Ended,
    TimedOut,
}

/// Relay events the tracker accepted, in UI terms.
#[derive(Debug, Clone, PartialEq)]
pub enum CallUpdate {
    Ringing {
        call_id: CallId,
        from: UserId,
        caller_name: String,
        signal: Value,
    },
    Placed {
        call_id: CallId,
        to: UserId,
    },
    Connected {
        call_id: CallId,
        signal: Value,
    },
    Closed {
        call_id: CallId,
        reason: CloseReason,
    },
    Signal {
        call_id: CallId,
        from: UserId,
        signal: Value,
    },
    Invited {
        call_id: CallId,
        from: UserId,
        caller_name: String,
    },
    PeerJoined {
        call_id: CallId,
        user_id: UserId,
        signal: Value,
    },
    PeerLeft {
        call_id: CallId,
        user_id: UserId,
    },
}

#[derive(Debug, Default)]
pub struct CallTracker {
    calls: HashMap<CallId, TrackedCall>,
    rooms: HashSet<CallId>,
}

impl CallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, call_id: &CallId) -> Option<&TrackedCall> {
        self.calls.get(call_id)
    }

    pub fn is_tracking(&self, call_id: &CallId) -> bool {
        self.calls.contains_key(call_id) || self.rooms.contains(call_id)
    }

    /// Fold one relay event into local state. `None` means discard.
    pub fn observe(&mut self, message: ServerMessage) -> Option<CallUpdate> {
        match message {
            ServerMessage::IncomingCall {
                from,
                signal,
                caller_name,
                call_id,
                ..
            } => {
                self.calls.insert(
                    call_id.clone(),
                    TrackedCall {
                        peer: from.clone(),
                        direction: Direction::Incoming,
                        state: CallState::Ringing,
                    },
                );
                Some(CallUpdate::Ringing {
                    call_id,
                    from,
                    caller_name,
                    signal,
                })
            }

            ServerMessage::CallPlaced { to, call_id } => {
                self.calls.insert(
                    call_id.clone(),
                    TrackedCall {
                        peer: to.clone(),
                        direction: Direction::Outgoing,
                        state: CallState::Ringing,
                    },
                );
                Some(CallUpdate::Placed { call_id, to })
            }

            ServerMessage::CallAccepted { signal, call_id } => {
                let call = self.calls.get_mut(&call_id)?;
                if call.direction != Direction::Outgoing {
                    return None;
                }
                call.state = call.state.transition(CallEvent::Accept).ok()?;
                Some(CallUpdate::Connected { call_id, signal })
            }

            ServerMessage::CallRejected { call_id } => self.close(call_id, CloseReason::Rejected),
            ServerMessage::CallEnded { call_id } => self.close(call_id, CloseReason::Ended),
            ServerMessage::CallTimeout { call_id } => self.close(call_id, CloseReason::TimedOut),

            ServerMessage::WebrtcSignal {
                from,
                signal,
                call_id,
            } => self.is_tracking(&call_id).then_some(CallUpdate::Signal {
                call_id,
                from,
                signal,
            }),

            ServerMessage::GroupCallInvite {
                from,
                call_id,
                caller_name,
            } => Some(CallUpdate::Invited {
                call_id,
                from,
                caller_name,
            }),

            ServerMessage::UserJoinedCall {
                call_id,
                user_id,
                signal,
            } => self.rooms.contains(&call_id).then_some(CallUpdate::PeerJoined {
                call_id,
                user_id,
                signal,
            }),

            ServerMessage::UserLeftCall { call_id, user_id } => self
                .rooms
                .contains(&call_id)
                .then_some(CallUpdate::PeerLeft { call_id, user_id }),

            ServerMessage::Pong => None,
        }
    }

    fn close(&mut self, call_id: CallId, reason: CloseReason) -> Option<CallUpdate> {
        self.calls.remove(&call_id)?;
        self.rooms.remove(&call_id);
        Some(CallUpdate::Closed { call_id, reason })
    }

    /// Answer a ringing incoming call.
    pub fn answer(&mut self, call_id: &CallId, signal: Value) -> Option<ClientMessage> {
        let call = self.calls.get_mut(call_id)?;
        if call.direction != Direction::Incoming {
            return None;
        }
        call.state = call.state.transition(CallEvent::Accept).ok()?;
        Some(ClientMessage::AcceptCall {
            to: call.peer.clone(),
            signal,
            call_id: call_id.clone(),
        })
    }

    /// Decline a ringing incoming call.
    pub fn decline(&mut self, call_id: &CallId) -> Option<ClientMessage> {
        match self.calls.get(call_id) {
            Some(call) if call.state == CallState::Ringing => {}
            _ => return None,
        }
        let call = self.calls.remove(call_id)?;
        Some(ClientMessage::RejectCall {
            to: call.peer,
            call_id: call_id.clone(),
        })
    }

    /// Hang up. The call is forgotten immediately, so anything the relay
    /// still sends for it is discarded.
    pub fn hang_up(&mut self, call_id: &CallId) -> Option<ClientMessage> {
        let call = self.calls.remove(call_id)?;
        self.rooms.remove(call_id);
        Some(ClientMessage::EndCall {
            to: call.peer,
            call_id: call_id.clone(),
        })
    }

    pub fn join_room(&mut self, call_id: CallId, me: UserId, signal: Value) -> ClientMessage {
        self.rooms.insert(call_id.clone());
        ClientMessage::JoinGroupCall {
            call_id,
            user_id: me,
            signal,
        }
    }

    pub fn leave_room(&mut self, call_id: &CallId) -> Option<ClientMessage> {
        self.rooms.remove(call_id).then(|| ClientMessage::LeaveGroupCall {
            call_id: call_id.clone(),
        })
    }
}

/// Async WebSocket connection to a relay.
pub struct RelayClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RelayClient {
    pub async fn connect(url: &str) -> ClientResult<Self> {
        let (ws, _) = connect_async(url).await?;
        Ok(Self { ws })
    }

    pub async fn send(&mut self, message: &ClientMessage) -> ClientResult<()> {
        let json = serde_json::to_string(message)?;
        self.ws.send(Message::Text(json)).await?;
        Ok(())
    }

    /// Next relay event. `None` once the relay closed the connection.
    pub async fn recv(&mut self) -> ClientResult<Option<ServerMessage>> {
        while let Some(frame) = self.ws.next().await {
            match frame? {
                Message::Text(text) => return Ok(Some(serde_json::from_str(&text)?)),
                Message::Close(_) => return Ok(None),
                _ => continue, // tungstenite answers pings itself
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) -> ClientResult<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn placed(tracker: &mut CallTracker, id: &str) -> CallId {
        let call_id = CallId::new(id);
        tracker.observe(ServerMessage::CallPlaced {
            to: UserId::new("u2"),
            call_id: call_id.clone(),
        });
        call_id
    }

    #[test]
    fn test_outgoing_call_connects() {
        let mut tracker = CallTracker::new();
        let call_id = placed(&mut tracker, "u1-u2-1");

        let update = tracker.observe(ServerMessage::CallAccepted {
            signal: json!("answer"),
            call_id: call_id.clone(),
        });
        assert_eq!(
            update,
            Some(CallUpdate::Connected {
                call_id: call_id.clone(),
                signal: json!("answer"),
            })
        );
        assert_eq!(tracker.get(&call_id).unwrap().state, CallState::Active);
    }

    #[test]
    fn test_accept_after_hang_up_is_discarded() {
        let mut tracker = CallTracker::new();
        let call_id = placed(&mut tracker, "u1-u2-1");

        let end = tracker.hang_up(&call_id).unwrap();
        assert!(matches!(end, ClientMessage::EndCall { ref to, .. } if to.as_str() == "u2"));

        let update = tracker.observe(ServerMessage::CallAccepted {
            signal: json!("answer"),
            call_id: call_id.clone(),
        });
        assert!(update.is_none());
        assert!(!tracker.is_tracking(&call_id));
    }

    #[test]
    fn test_duplicate_accept_is_discarded() {
        let mut tracker = CallTracker::new();
        let call_id = placed(&mut tracker, "u1-u2-1");
        let accepted = ServerMessage::CallAccepted {
            signal: json!("answer"),
            call_id,
        };

        assert!(tracker.observe(accepted.clone()).is_some());
        assert!(tracker.observe(accepted).is_none());
    }

    #[test]
    fn test_unknown_call_events_are_discarded() {
        let mut tracker = CallTracker::new();
        let stranger = CallId::new("x-y-1");

        assert!(tracker
            .observe(ServerMessage::CallEnded {
                call_id: stranger.clone()
            })
            .is_none());
        assert!(tracker
            .observe(ServerMessage::WebrtcSignal {
                from: UserId::new("x"),
                signal: json!({}),
                call_id: stranger.clone(),
            })
            .is_none());
        assert!(tracker
            .observe(ServerMessage::UserJoinedCall {
                call_id: stranger,
                user_id: UserId::new("x"),
                signal: json!({}),
            })
            .is_none());
    }

    #[test]
    fn test_incoming_call_answer_and_end() {
        let mut tracker = CallTracker::new();
        let call_id = CallId::new("u1-u2-1");

        let update = tracker.observe(ServerMessage::IncomingCall {
            from: UserId::new("u1"),
            signal: json!("offer"),
            caller_name: "Alice".to_string(),
            call_id: call_id.clone(),
            call_type: None,
        });
        assert!(matches!(update, Some(CallUpdate::Ringing { .. })));

        match tracker.answer(&call_id, json!("answer")).unwrap() {
            ClientMessage::AcceptCall { to, .. } => assert_eq!(to.as_str(), "u1"),
            other => panic!("Expected accept-call, got {:?}", other),
        }
        // Can't answer twice
        assert!(tracker.answer(&call_id, json!("answer")).is_none());
        // An incoming call never sees call-accepted for itself
        assert!(tracker
            .observe(ServerMessage::CallAccepted {
                signal: json!("x"),
                call_id: call_id.clone(),
            })
            .is_none());

        let update = tracker.observe(ServerMessage::CallEnded {
            call_id: call_id.clone(),
        });
        assert_eq!(
            update,
            Some(CallUpdate::Closed {
                call_id: call_id.clone(),
                reason: CloseReason::Ended,
            })
        );
        assert!(tracker.get(&call_id).is_none());
    }

    #[test]
    fn test_decline_only_while_ringing() {
        let mut tracker = CallTracker::new();
        let call_id = CallId::new("u1-u2-1");
        tracker.observe(ServerMessage::IncomingCall {
            from: UserId::new("u1"),
            signal: json!("offer"),
            caller_name: "Alice".to_string(),
            call_id: call_id.clone(),
            call_type: None,
        });

        assert!(matches!(
            tracker.decline(&call_id),
            Some(ClientMessage::RejectCall { .. })
        ));
        assert!(tracker.decline(&call_id).is_none());
    }

    #[test]
    fn test_timeout_closes_call() {
        let mut tracker = CallTracker::new();
        let call_id = placed(&mut tracker, "u1-u2-1");

        assert_eq!(
            tracker.observe(ServerMessage::CallTimeout {
                call_id: call_id.clone()
            }),
            Some(CallUpdate::Closed {
                call_id,
                reason: CloseReason::TimedOut,
            })
        );
    }

    #[test]
    fn test_room_events_after_join() {
        let mut tracker = CallTracker::new();
        let room = CallId::new("room1");

        let msg = tracker.join_room(room.clone(), UserId::new("u1"), json!("S1"));
        assert!(matches!(msg, ClientMessage::JoinGroupCall { .. }));

        assert!(matches!(
            tracker.observe(ServerMessage::UserJoinedCall {
                call_id: room.clone(),
                user_id: UserId::new("u2"),
                signal: json!("S2"),
            }),
            Some(CallUpdate::PeerJoined { .. })
        ));
        assert!(matches!(
            tracker.observe(ServerMessage::WebrtcSignal {
                from: UserId::new("u2"),
                signal: json!("S2b"),
                call_id: room.clone(),
            }),
            Some(CallUpdate::Signal { .. })
        ));

        assert!(tracker.leave_room(&room).is_some());
        assert!(tracker.leave_room(&room).is_none());
        assert!(tracker
            .observe(ServerMessage::UserLeftCall {
                call_id: room,
                user_id: UserId::new("u2"),
            })
            .is_none());
    }

    #[test]
    fn test_invite_is_always_surfaced() {
        let mut tracker = CallTracker::new();
        let update = tracker.observe(ServerMessage::GroupCallInvite {
            from: UserId::new("u1"),
            call_id: CallId::new("u1-u2-1"),
            caller_name: "Alice".to_string(),
        });
        assert!(matches!(update, Some(CallUpdate::Invited { .. })));
        assert!(tracker.observe(ServerMessage::Pong).is_none());
    }
}
