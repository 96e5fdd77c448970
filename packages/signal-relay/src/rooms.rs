//! Group call rooms.
//!
//! A room is keyed by call id and holds sessions, not users, so two tabs of
//! the same user are two members. Each member remembers the user id it
//! joined as, which is what other members see in room events.

use std::collections::HashMap;

use crate::protocol::{CallId, SessionId, UserId};

/// One group call room.
#[derive(Debug, Clone)]
pub struct GroupRoom {
    pub call_id: CallId,
    /// Session → user id it joined as
    pub members: HashMap<SessionId, UserId>,
}

/// Result of a join attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Newly added; these are the members that were already in the room.
    Joined { others: Vec<(SessionId, UserId)> },
    /// The session was already a member. Nothing changed.
    AlreadyMember,
    /// The room is at capacity.
    Full,
}

/// Room a session was removed from, with whoever is still inside.
#[derive(Debug)]
pub struct Departure {
    pub call_id: CallId,
    pub user: UserId,
    pub remaining: Vec<SessionId>,
}

#[derive(Debug)]
pub struct GroupRooms {
    rooms: HashMap<CallId, GroupRoom>,
    max_members: usize,
}

impl GroupRooms {
    pub fn new(max_members: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            max_members: max_members.max(1),
        }
    }

    /// Add `session` to the room for `call_id`, creating the room on first
    /// join. Adding an existing member is a no-op.
    pub fn join(&mut self, call_id: &CallId, session: SessionId, user: UserId) -> JoinOutcome {
        let room = self
            .rooms
            .entry(call_id.clone())
            .or_insert_with(|| GroupRoom {
                call_id: call_id.clone(),
                members: HashMap::new(),
            });

        if room.members.contains_key(&session) {
            return JoinOutcome::AlreadyMember;
        }

        if room.members.len() >= self.max_members {
            tracing::warn!(call_id = %call_id, "Group room full");
            return JoinOutcome::Full;
        }

        let others = room
            .members
            .iter()
            .map(|(s, u)| (*s, u.clone()))
            .collect();
        room.members.insert(session, user);

        tracing::info!(
            call_id = %call_id,
            session = %session,
            member_count = room.members.len(),
            "Session joined group room"
        );

        JoinOutcome::Joined { others }
    }

    /// Remove `session` from one room. Drops the room when it empties.
    pub fn leave(&mut self, call_id: &CallId, session: SessionId) -> Option<Departure> {
        let room = self.rooms.get_mut(call_id)?;
        let user = room.members.remove(&session)?;
        let remaining: Vec<SessionId> = room.members.keys().copied().collect();

        tracing::info!(
            call_id = %call_id,
            session = %session,
            remaining = remaining.len(),
            "Session left group room"
        );

        if remaining.is_empty() {
            self.rooms.remove(call_id);
            tracing::debug!(call_id = %call_id, "Removed empty group room");
        }

        Some(Departure {
            call_id: call_id.clone(),
            user,
            remaining,
        })
    }

    /// Remove a disconnected session from every room it is in.
    pub fn leave_all(&mut self, session: SessionId) -> Vec<Departure> {
        let call_ids: Vec<CallId> = self
            .rooms
            .values()
            .filter(|r| r.members.contains_key(&session))
            .map(|r| r.call_id.clone())
            .collect();

        call_ids
            .iter()
            .filter_map(|call_id| self.leave(call_id, session))
            .collect()
    }

    pub fn get(&self, call_id: &CallId) -> Option<&GroupRoom> {
        self.rooms.get(call_id)
    }

    /// User id `session` joined the room as, if it is a member.
    pub fn member_user(&self, call_id: &CallId, session: SessionId) -> Option<&UserId> {
        self.rooms.get(call_id)?.members.get(&session)
    }

    /// A member session of the room that joined as `user`.
    pub fn session_for(&self, call_id: &CallId, user: &UserId) -> Option<SessionId> {
        self.rooms
            .get(call_id)?
            .members
            .iter()
            .find(|(_, u)| *u == user)
            .map(|(s, _)| *s)
    }

    /// Member sessions of a room. Empty when the room does not exist.
    pub fn members(&self, call_id: &CallId) -> Vec<SessionId> {
        self.rooms
            .get(call_id)
            .map(|r| r.members.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
