//! Call state machine and call table.
//!
//! ```text
//!            accept              end / disconnect
//!   RINGING ───────► ACTIVE ─────────────────────► ENDED
//!      │                                             ▲
//!      ├── end / disconnect / timeout ───────────────┘
//!      │
//!      └── reject ─────────────────────────────────► REJECTED
//! ```
//!
//! Every state change goes through [`CallState::transition`]. Terminal
//! records stay in the table for a retention window so late messages for
//! the call id are recognised and dropped.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::protocol::{CallId, SessionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Ringing,
    Active,
    Ended,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    Accept,
    Reject,
    End,
    Timeout,
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot apply {event:?} to a call in state {from:?}")]
pub struct TransitionError {
    pub from: CallState,
    pub event: CallEvent,
}

impl CallState {
    pub fn transition(self, event: CallEvent) -> Result<CallState, TransitionError> {
        use CallEvent::*;
        use CallState::*;

        match (self, event) {
            (Ringing, Accept) => Ok(Active),
            (Ringing, Reject) => Ok(Rejected),
            (Ringing, End | Timeout | Disconnect) => Ok(Ended),
            (Active, End | Disconnect) => Ok(Ended),
            (from, event) => Err(TransitionError { from, event }),
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, CallState::Ringing | CallState::Active)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_live()
    }
}

/// One side of a one-to-one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Party {
    pub user: UserId,
    /// Session that placed the call, or that was rung and later accepted
    pub session: SessionId,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub id: CallId,
    pub initiator: Party,
    pub target: Party,
    pub state: CallState,
    /// Users invited into the call after it was placed
    pub invited: HashSet<UserId>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Call {
    /// Initiator or target.
    pub fn is_principal(&self, user: &UserId) -> bool {
        self.initiator.user == *user || self.target.user == *user
    }

    /// Principal or invited.
    pub fn is_party(&self, user: &UserId) -> bool {
        self.is_principal(user) || self.invited.contains(user)
    }

    /// The other principal, from `user`'s point of view.
    pub fn counterpart(&self, user: &UserId) -> Option<&Party> {
        if self.initiator.user == *user {
            Some(&self.target)
        } else if self.target.user == *user {
            Some(&self.initiator)
        } else {
            None
        }
    }

    pub fn involves_session(&self, session: SessionId) -> bool {
        self.initiator.session == session || self.target.session == session
    }
}

/// Parameters for a call being placed.
#[derive(Debug, Clone)]
pub struct NewCall {
    pub initiator: Party,
    pub target: Party,
}

#[derive(Debug, Default)]
pub struct CallTable {
    calls: HashMap<CallId, Call>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new ringing call and return its id.
    ///
    /// Ids are `initiator-target-millis`. Two calls between the same pair in
    /// the same millisecond get the timestamp bumped until the id is free.
    pub fn place(&mut self, call: NewCall, now: DateTime<Utc>) -> CallId {
        let mut stamp = now.timestamp_millis();
        let id = loop {
            let candidate = CallId::new(format!(
                "{}-{}-{}",
                call.initiator.user, call.target.user, stamp
            ));
            if !self.calls.contains_key(&candidate) {
                break candidate;
            }
            stamp += 1;
        };

        self.calls.insert(
            id.clone(),
            Call {
                id: id.clone(),
                initiator: call.initiator,
                target: call.target,
                state: CallState::Ringing,
                invited: HashSet::new(),
                ended_at: None,
            },
        );

        id
    }

    pub fn get(&self, call_id: &CallId) -> Option<&Call> {
        self.calls.get(call_id)
    }

    pub fn get_mut(&mut self, call_id: &CallId) -> Option<&mut Call> {
        self.calls.get_mut(call_id)
    }

    /// Apply `event` to a call. The record is left untouched on error.
    pub fn apply(
        &mut self,
        call_id: &CallId,
        event: CallEvent,
        now: DateTime<Utc>,
    ) -> Option<Result<&Call, TransitionError>> {
        let call = self.calls.get_mut(call_id)?;
        Some(match call.state.transition(event) {
            Ok(next) => {
                tracing::debug!(
                    call_id = %call_id,
                    from = ?call.state,
                    to = ?next,
                    "Call transition"
                );
                call.state = next;
                if next.is_terminal() {
                    call.ended_at = Some(now);
                }
                Ok(&*call)
            }
            Err(e) => Err(e),
        })
    }

    /// Ids of live calls placed or answered by `session`.
    pub fn live_calls_for_session(&self, session: SessionId) -> Vec<CallId> {
        self.calls
            .values()
            .filter(|c| c.state.is_live() && c.involves_session(session))
            .map(|c| c.id.clone())
            .collect()
    }

    /// Drop terminal calls that ended more than `retention_secs` ago.
    pub fn sweep(&mut self, retention_secs: i64, now: DateTime<Utc>) -> usize {
        let before = self.calls.len();
        self.calls.retain(|_, call| match call.ended_at {
            Some(ended) if call.state.is_terminal() => {
                now.signed_duration_since(ended).num_seconds() < retention_secs
            }
            _ => true,
        });
        before - self.calls.len()
    }

    pub fn count_in(&self, state: CallState) -> usize {
        self.calls.values().filter(|c| c.state == state).count()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_call(from: &str, to: &str) -> NewCall {
        NewCall {
            initiator: Party {
                user: UserId::new(from),
                session: SessionId::new(),
            },
            target: Party {
                user: UserId::new(to),
                session: SessionId::new(),
            },
        }
    }

    #[test]
    fn test_valid_transitions() {
        use CallEvent::*;
        use CallState::*;

        assert_eq!(Ringing.transition(Accept), Ok(Active));
        assert_eq!(Ringing.transition(Reject), Ok(Rejected));
        assert_eq!(Ringing.transition(End), Ok(Ended));
        assert_eq!(Ringing.transition(Timeout), Ok(Ended));
        assert_eq!(Ringing.transition(Disconnect), Ok(Ended));
        assert_eq!(Active.transition(End), Ok(Ended));
        assert_eq!(Active.transition(Disconnect), Ok(Ended));
    }

    #[test]
    fn test_invalid_transitions() {
        use CallEvent::*;
        use CallState::*;

        for event in [Accept, Reject, End, Timeout, Disconnect] {
            assert!(Ended.transition(event).is_err());
            assert!(Rejected.transition(event).is_err());
        }
        assert_eq!(
            Active.transition(Accept),
            Err(TransitionError {
                from: Active,
                event: Accept
            })
        );
        assert!(Active.transition(Reject).is_err());
        assert!(Active.transition(Timeout).is_err());
    }

    #[test]
    fn test_place_mints_pair_and_timestamp() {
        let mut table = CallTable::new();
        let now = Utc::now();

        let id = table.place(new_call("u1", "u2"), now);
        assert_eq!(id.as_str(), format!("u1-u2-{}", now.timestamp_millis()));
        assert_eq!(table.get(&id).unwrap().state, CallState::Ringing);
    }

    #[test]
    fn test_place_same_millisecond_gets_distinct_ids() {
        let mut table = CallTable::new();
        let now = Utc::now();

        let first = table.place(new_call("u1", "u2"), now);
        let second = table.place(new_call("u1", "u2"), now);
        assert_ne!(first, second);
        assert_eq!(table.len(), 2);
        assert_eq!(table.count_in(CallState::Ringing), 2);
    }

    #[test]
    fn test_apply_sets_ended_at_on_terminal() {
        let mut table = CallTable::new();
        let now = Utc::now();
        let id = table.place(new_call("u1", "u2"), now);

        let call = table.apply(&id, CallEvent::Accept, now).unwrap().unwrap();
        assert_eq!(call.state, CallState::Active);
        assert!(call.ended_at.is_none());

        let call = table.apply(&id, CallEvent::End, now).unwrap().unwrap();
        assert_eq!(call.state, CallState::Ended);
        assert_eq!(call.ended_at, Some(now));

        let err = table.apply(&id, CallEvent::Accept, now).unwrap().unwrap_err();
        assert_eq!(err.from, CallState::Ended);
    }

    #[test]
    fn test_apply_unknown_call() {
        let mut table = CallTable::new();
        assert!(table
            .apply(&CallId::new("nope"), CallEvent::End, Utc::now())
            .is_none());
    }

    #[test]
    fn test_counterpart_and_parties() {
        let mut table = CallTable::new();
        let id = table.place(new_call("u1", "u2"), Utc::now());
        let call = table.get_mut(&id).unwrap();
        call.invited.insert(UserId::new("u3"));

        let call = table.get(&id).unwrap();
        assert_eq!(call.counterpart(&UserId::new("u1")).unwrap().user.as_str(), "u2");
        assert_eq!(call.counterpart(&UserId::new("u2")).unwrap().user.as_str(), "u1");
        assert!(call.counterpart(&UserId::new("u3")).is_none());
        assert!(call.is_party(&UserId::new("u3")));
        assert!(!call.is_principal(&UserId::new("u3")));
        assert!(!call.is_party(&UserId::new("u4")));
    }

    #[test]
    fn test_live_calls_for_session() {
        let mut table = CallTable::new();
        let now = Utc::now();
        let call = new_call("u1", "u2");
        let session = call.initiator.session;

        let live = table.place(call.clone(), now);
        let dead = table.place(call, now);
        table.apply(&dead, CallEvent::End, now);

        assert_eq!(table.live_calls_for_session(session), vec![live]);
        assert!(table.live_calls_for_session(SessionId::new()).is_empty());
    }

    #[test]
    fn test_sweep_keeps_live_and_recent() {
        let mut table = CallTable::new();
        let now = Utc::now();

        let live = table.place(new_call("u1", "u2"), now);
        let old = table.place(new_call("u3", "u4"), now);
        let recent = table.place(new_call("u5", "u6"), now);
        table.apply(&old, CallEvent::End, now - Duration::seconds(600));
        table.apply(&recent, CallEvent::End, now - Duration::seconds(10));

        assert_eq!(table.sweep(300, now), 1);
        assert!(table.get(&live).is_some());
        assert!(table.get(&old).is_none());
        assert!(table.get(&recent).is_some());
    }
}
