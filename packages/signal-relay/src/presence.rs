//! Presence registry.
//!
//! Maps a user id to the session that currently routes for it, and each
//! session to the user it was bound to by `join`. At most one session per
//! user: the latest registration wins.

use std::collections::HashMap;

use crate::protocol::{SessionId, UserId};

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    by_user: HashMap<UserId, SessionId>,
    by_session: HashMap<SessionId, UserId>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `user` to `session`, superseding any previous session.
    /// The old session is not torn down, it just stops receiving traffic
    /// addressed to `user`.
    pub fn register(&mut self, user: UserId, session: SessionId) {
        if let Some(previous) = self.by_user.insert(user.clone(), session) {
            if previous != session {
                tracing::debug!(
                    user = %user,
                    previous = %previous,
                    session = %session,
                    "Presence superseded"
                );
            }
        }
        self.by_session.insert(session, user);
    }

    pub fn lookup(&self, user: &UserId) -> Option<SessionId> {
        self.by_user.get(user).copied()
    }

    /// Remove the presence entry only if it still points at `session`.
    /// Returns true if an entry was removed.
    pub fn remove_if_current(&mut self, user: &UserId, session: SessionId) -> bool {
        match self.by_user.get(user) {
            Some(current) if *current == session => {
                self.by_user.remove(user);
                true
            }
            _ => false,
        }
    }

    /// The user a session was bound to by `join`.
    pub fn user_of(&self, session: SessionId) -> Option<&UserId> {
        self.by_session.get(&session)
    }

    /// Drop the binding of a disconnected session.
    pub fn forget_session(&mut self, session: SessionId) -> Option<UserId> {
        self.by_session.remove(&session)
    }

    /// Number of users currently routable.
    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut presence = PresenceRegistry::new();
        let s1 = SessionId::new();
        let alice = UserId::new("alice");

        assert!(presence.lookup(&alice).is_none());
        presence.register(alice.clone(), s1);
        assert_eq!(presence.lookup(&alice), Some(s1));
        assert_eq!(presence.user_of(s1), Some(&alice));
        assert_eq!(presence.len(), 1);
    }

    #[test]
    fn test_last_registration_wins() {
        let mut presence = PresenceRegistry::new();
        let (s1, s2) = (SessionId::new(), SessionId::new());
        let alice = UserId::new("alice");

        presence.register(alice.clone(), s1);
        presence.register(alice.clone(), s2);
        assert_eq!(presence.lookup(&alice), Some(s2));
        assert_eq!(presence.len(), 1);
    }

    #[test]
    fn test_stale_disconnect_keeps_newer_session() {
        let mut presence = PresenceRegistry::new();
        let (s1, s2) = (SessionId::new(), SessionId::new());
        let alice = UserId::new("alice");

        presence.register(alice.clone(), s1);
        presence.register(alice.clone(), s2);

        assert!(!presence.remove_if_current(&alice, s1));
        assert_eq!(presence.lookup(&alice), Some(s2));

        assert!(presence.remove_if_current(&alice, s2));
        assert!(presence.lookup(&alice).is_none());
        assert!(presence.is_empty());
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut presence = PresenceRegistry::new();
        assert!(!presence.remove_if_current(&UserId::new("ghost"), SessionId::new()));
    }

    #[test]
    fn test_forget_session_returns_binding() {
        let mut presence = PresenceRegistry::new();
        let s1 = SessionId::new();
        presence.register(UserId::new("bob"), s1);

        assert_eq!(presence.forget_session(s1), Some(UserId::new("bob")));
        assert_eq!(presence.forget_session(s1), None);
        // Routing entry is separate from the binding
        assert_eq!(presence.lookup(&UserId::new("bob")), Some(s1));
    }
}
