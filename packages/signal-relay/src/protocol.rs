//! Relay protocol message definitions.
//!
//! The relay speaks named JSON events over WebSocket:
//!
//! ```text
//! {"event": "call-user", "data": {"to": "u2", "signal": {...}, "callerName": "Alice"}}
//! ```
//!
//! Signal payloads are opaque to the relay. It never looks inside an SDP
//! offer, answer or ICE candidate, it only carries them to the right session.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Transport-level handle for one connected client. Assigned on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque user identifier supplied by the client on `join`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Call correlation id, conventionally `initiator-target-timestamp`.
/// Group rooms reuse the same id space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Media kind requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Audio,
    Video,
}

// ── Client → Relay ────────────────────────────────────────────────────────────

/// Messages sent from a client to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Bind this connection to a user id. Last registration wins.
    Join { user_id: UserId },

    /// Ring another user. `from` is informational; the relay uses the
    /// sender's registered user id.
    CallUser {
        to: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<UserId>,
        signal: Value,
        caller_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_type: Option<CallKind>,
    },

    /// Answer a ringing call.
    AcceptCall {
        to: UserId,
        signal: Value,
        call_id: CallId,
    },

    /// Decline a ringing call.
    RejectCall { to: UserId, call_id: CallId },

    /// Hang up a ringing or active call.
    EndCall { to: UserId, call_id: CallId },

    /// Forward an SDP/ICE blob to a peer in the call.
    WebrtcSignal {
        to: UserId,
        signal: Value,
        call_id: CallId,
    },

    /// Invite a third user into an existing call.
    InviteToCall {
        to: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<UserId>,
        call_id: CallId,
        caller_name: String,
    },

    /// Enter the group room for a call id.
    JoinGroupCall {
        call_id: CallId,
        user_id: UserId,
        signal: Value,
    },

    /// Leave the group room for a call id.
    LeaveGroupCall { call_id: CallId },

    /// Keepalive.
    Ping,
}

impl ClientMessage {
    /// Wire name of the event, for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "join",
            ClientMessage::CallUser { .. } => "call-user",
            ClientMessage::AcceptCall { .. } => "accept-call",
            ClientMessage::RejectCall { .. } => "reject-call",
            ClientMessage::EndCall { .. } => "end-call",
            ClientMessage::WebrtcSignal { .. } => "webrtc-signal",
            ClientMessage::InviteToCall { .. } => "invite-to-call",
            ClientMessage::JoinGroupCall { .. } => "join-group-call",
            ClientMessage::LeaveGroupCall { .. } => "leave-group-call",
            ClientMessage::Ping => "ping",
        }
    }
}

// ── Relay → Client ────────────────────────────────────────────────────────────

/// Messages sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Someone is ringing you.
    IncomingCall {
        from: UserId,
        signal: Value,
        caller_name: String,
        call_id: CallId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_type: Option<CallKind>,
    },

    /// Sent to the initiator once the target's session has been rung.
    CallPlaced { to: UserId, call_id: CallId },

    /// The callee answered.
    CallAccepted { signal: Value, call_id: CallId },

    /// The counterpart declined.
    CallRejected { call_id: CallId },

    /// The call was hung up or a participant dropped.
    CallEnded { call_id: CallId },

    /// Nobody answered before the ring timeout.
    CallTimeout { call_id: CallId },

    /// A signaling blob from a peer in the call.
    WebrtcSignal {
        from: UserId,
        signal: Value,
        call_id: CallId,
    },

    /// You were invited into a call.
    GroupCallInvite {
        from: UserId,
        call_id: CallId,
        caller_name: String,
    },

    /// A new member entered the group room.
    UserJoinedCall {
        call_id: CallId,
        user_id: UserId,
        signal: Value,
    },

    /// A member left the group room or dropped.
    UserLeftCall { call_id: CallId, user_id: UserId },

    /// Keepalive response.
    Pong,
}

impl ServerMessage {
    /// Call id the message refers to, if any.
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            ServerMessage::IncomingCall { call_id, .. }
            | ServerMessage::CallPlaced { call_id, .. }
            | ServerMessage::CallAccepted { call_id, .. }
            | ServerMessage::CallRejected { call_id }
            | ServerMessage::CallEnded { call_id }
            | ServerMessage::CallTimeout { call_id }
            | ServerMessage::WebrtcSignal { call_id, .. }
            | ServerMessage::GroupCallInvite { call_id, .. }
            | ServerMessage::UserJoinedCall { call_id, .. }
            | ServerMessage::UserLeftCall { call_id, .. } => Some(call_id),
            ServerMessage::Pong => None,
        }
    }
}
