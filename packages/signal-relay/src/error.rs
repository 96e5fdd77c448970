//! Error types.
//!
//! [`RelayError`] values never reach a client. The dispatcher logs them and
//! drops the message: the signaling channel has no error path, and a
//! counterpart falls back on its own timeouts.

use thiserror::Error;

use crate::call::TransitionError;
use crate::protocol::{CallId, SessionId, UserId};

#[derive(Debug, Error)]
pub enum RelayError {
    /// A required field was present but blank.
    #[error("missing or empty field `{0}`")]
    MissingField(&'static str),

    /// The session has not sent `join` and has no other identity.
    #[error("session {0} has not joined")]
    NotRegistered(SessionId),

    /// A session tried to re-bind to a different user id.
    #[error("session {session} is bound to {bound}, refusing {requested}")]
    AlreadyBound {
        session: SessionId,
        bound: UserId,
        requested: UserId,
    },

    /// An unjoined session claimed a user id that belongs to someone else.
    #[error("session {session} may not speak as {user}")]
    IdentityTaken { session: SessionId, user: UserId },

    /// No call or group room is known under this id.
    #[error("unknown call {0}")]
    UnknownCall(CallId),

    /// The call exists but is already terminal.
    #[error("call {0} is no longer live")]
    CallClosed(CallId),

    /// The sender has no role in the call.
    #[error("{user} is not a party to call {call_id}")]
    NotAParty { call_id: CallId, user: UserId },

    /// The group room reached its configured size.
    #[error("group room {0} is full")]
    RoomFull(CallId),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Failures of the WebSocket client side.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid relay message: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
