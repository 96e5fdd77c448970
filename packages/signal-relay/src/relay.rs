//! The signaling relay.
//!
//! [`Relay`] owns presence, calls and group rooms. Each inbound message is
//! handled to completion against that state before the next one, and every
//! outbound message goes through an [`Outbox`], so the relay can run inside
//! the actor in production and against a recording fake in tests.
//!
//! Routing is fire-and-forget. A destination that is not present, a stale
//! call id or a malformed message all end the same way: the message is
//! logged and dropped, and the sender is told nothing.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use crate::call::{CallEvent, CallState, CallTable, NewCall, Party};
use crate::error::{RelayError, RelayResult};
use crate::presence::PresenceRegistry;
use crate::protocol::{CallId, CallKind, ClientMessage, ServerMessage, SessionId, UserId};
use crate::rooms::{GroupRooms, JoinOutcome};
use crate::state::RelayConfig;

/// Where the relay puts outbound traffic.
pub trait Outbox {
    /// Queue `message` for `session`. Returns false if the session is gone.
    fn deliver(&self, session: SessionId, message: ServerMessage) -> bool;

    /// Ask for [`Relay::ring_timeout`] to be called for `call_id` later.
    fn arm_ring_timer(&self, _call_id: &CallId, _after: Duration) {}
}

/// Counters exposed on `/stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RelayStats {
    pub registered_users: usize,
    pub ringing_calls: usize,
    pub active_calls: usize,
    pub group_rooms: usize,
}

pub struct Relay {
    pub(crate) presence: PresenceRegistry,
    pub(crate) calls: CallTable,
    pub(crate) rooms: GroupRooms,
    pub(crate) config: RelayConfig,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            presence: PresenceRegistry::new(),
            calls: CallTable::new(),
            rooms: GroupRooms::new(config.max_group_size),
            config,
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn calls(&self) -> &CallTable {
        &self.calls
    }

    pub fn rooms(&self) -> &GroupRooms {
        &self.rooms
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            registered_users: self.presence.len(),
            ringing_calls: self.calls.count_in(CallState::Ringing),
            active_calls: self.calls.count_in(CallState::Active),
            group_rooms: self.rooms.len(),
        }
    }

    /// Handle one client message. Never fails outward.
    pub fn handle(&mut self, session: SessionId, message: ClientMessage, out: &dyn Outbox) {
        let event = message.event_name();
        if let Err(e) = self.dispatch(session, message, out) {
            tracing::debug!(
                session = %session,
                event = event,
                error = %e,
                "Dropped client message"
            );
        }
    }

    fn dispatch(
        &mut self,
        session: SessionId,
        message: ClientMessage,
        out: &dyn Outbox,
    ) -> RelayResult<()> {
        match message {
            ClientMessage::Join { user_id } => self.on_join(session, user_id),

            ClientMessage::CallUser {
                to,
                from,
                signal,
                caller_name,
                call_type,
            } => self.on_call_user(session, to, from, signal, caller_name, call_type, out),

            ClientMessage::AcceptCall {
                to,
                signal,
                call_id,
            } => self.on_accept_call(session, &to, signal, call_id, out),

            ClientMessage::RejectCall { call_id, .. } => {
                self.on_reject_call(session, call_id, out)
            }

            ClientMessage::EndCall { call_id, .. } => self.on_end_call(session, call_id, out),

            ClientMessage::WebrtcSignal {
                to,
                signal,
                call_id,
            } => self.on_webrtc_signal(session, to, signal, call_id, out),

            ClientMessage::InviteToCall {
                to,
                call_id,
                caller_name,
                ..
            } => self.on_invite_to_call(session, to, call_id, caller_name, out),

            ClientMessage::JoinGroupCall {
                call_id,
                user_id,
                signal,
            } => self.on_join_group_call(session, call_id, user_id, signal, out),

            ClientMessage::LeaveGroupCall { call_id } => {
                self.on_leave_group_call(session, call_id, out)
            }

            ClientMessage::Ping => {
                out.deliver(session, ServerMessage::Pong);
                Ok(())
            }
        }
    }

    // ── Presence ──────────────────────────────────────────────────────────

    fn on_join(&mut self, session: SessionId, user_id: UserId) -> RelayResult<()> {
        if user_id.is_empty() {
            return Err(RelayError::MissingField("userId"));
        }

        if let Some(bound) = self.presence.user_of(session) {
            if *bound != user_id {
                return Err(RelayError::AlreadyBound {
                    session,
                    bound: bound.clone(),
                    requested: user_id,
                });
            }
        }

        tracing::info!(session = %session, user = %user_id, "User joined");
        self.presence.register(user_id, session);
        Ok(())
    }

    /// The user a session speaks for: its `join` binding.
    fn registered_user(&self, session: SessionId) -> RelayResult<UserId> {
        self.presence
            .user_of(session)
            .cloned()
            .ok_or(RelayError::NotRegistered(session))
    }

    /// Like [`Self::registered_user`], but a session that only entered the
    /// group room for `call_id` speaks as the user it joined the room with.
    fn sender_in_call(&self, session: SessionId, call_id: &CallId) -> RelayResult<UserId> {
        if let Some(user) = self.presence.user_of(session) {
            return Ok(user.clone());
        }
        self.rooms
            .member_user(call_id, session)
            .cloned()
            .ok_or(RelayError::NotRegistered(session))
    }

    // ── One-to-one call handshake ─────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn on_call_user(
        &mut self,
        session: SessionId,
        to: UserId,
        from: Option<UserId>,
        signal: Value,
        caller_name: String,
        call_type: Option<CallKind>,
        out: &dyn Outbox,
    ) -> RelayResult<()> {
        if to.is_empty() {
            return Err(RelayError::MissingField("to"));
        }
        let initiator = self.registered_user(session)?;
        warn_on_spoofed_sender(session, &initiator, from.as_ref());

        let Some(target_session) = self.presence.lookup(&to) else {
            tracing::debug!(from = %initiator, to = %to, "Call target offline, not ringing");
            return Ok(());
        };

        let call_id = self.calls.place(
            NewCall {
                initiator: Party {
                    user: initiator.clone(),
                    session,
                },
                target: Party {
                    user: to.clone(),
                    session: target_session,
                },
            },
            Utc::now(),
        );

        tracing::info!(call_id = %call_id, from = %initiator, to = %to, "Call ringing");

        out.deliver(
            target_session,
            ServerMessage::IncomingCall {
                from: initiator,
                signal,
                caller_name,
                call_id: call_id.clone(),
                call_type,
            },
        );
        out.deliver(
            session,
            ServerMessage::CallPlaced {
                to,
                call_id: call_id.clone(),
            },
        );

        if self.config.ring_timeout_secs > 0 {
            out.arm_ring_timer(&call_id, Duration::from_secs(self.config.ring_timeout_secs));
        }

        Ok(())
    }

    fn on_accept_call(
        &mut self,
        session: SessionId,
        to: &UserId,
        signal: Value,
        call_id: CallId,
        out: &dyn Outbox,
    ) -> RelayResult<()> {
        let user = self.registered_user(session)?;
        let call = self
            .calls
            .get(&call_id)
            .ok_or_else(|| RelayError::UnknownCall(call_id.clone()))?;

        if call.target.user != user {
            return Err(RelayError::NotAParty { call_id, user });
        }
        if call.initiator.user != *to {
            tracing::debug!(
                call_id = %call_id,
                to = %to,
                initiator = %call.initiator.user,
                "accept-call addressed to someone other than the initiator"
            );
        }

        self.apply(&call_id, CallEvent::Accept)?;

        let initiator_session = match self.calls.get_mut(&call_id) {
            Some(call) => {
                call.target.session = session;
                call.initiator.session
            }
            None => return Err(RelayError::UnknownCall(call_id)),
        };

        tracing::info!(call_id = %call_id, "Call accepted");
        out.deliver(initiator_session, ServerMessage::CallAccepted { signal, call_id });
        Ok(())
    }

    fn on_reject_call(
        &mut self,
        session: SessionId,
        call_id: CallId,
        out: &dyn Outbox,
    ) -> RelayResult<()> {
        let user = self.registered_user(session)?;
        let counterpart = self
            .calls
            .get(&call_id)
            .ok_or_else(|| RelayError::UnknownCall(call_id.clone()))?
            .counterpart(&user)
            .map(|p| p.session);

        let Some(counterpart) = counterpart else {
            return Err(RelayError::NotAParty { call_id, user });
        };

        self.apply(&call_id, CallEvent::Reject)?;

        tracing::info!(call_id = %call_id, by = %user, "Call rejected");
        out.deliver(counterpart, ServerMessage::CallRejected { call_id });
        Ok(())
    }

    fn on_end_call(
        &mut self,
        session: SessionId,
        call_id: CallId,
        out: &dyn Outbox,
    ) -> RelayResult<()> {
        let user = self.registered_user(session)?;
        let call = self
            .calls
            .get(&call_id)
            .ok_or_else(|| RelayError::UnknownCall(call_id.clone()))?;
        if !call.is_principal(&user) {
            return Err(RelayError::NotAParty { call_id, user });
        }

        self.apply(&call_id, CallEvent::End)?;

        tracing::info!(call_id = %call_id, by = %user, "Call ended");
        let ended = ServerMessage::CallEnded {
            call_id: call_id.clone(),
        };
        self.fan_out(&call_id, session, ended, out);
        Ok(())
    }

    // ── Signal relay ──────────────────────────────────────────────────────

    fn on_webrtc_signal(
        &mut self,
        session: SessionId,
        to: UserId,
        signal: Value,
        call_id: CallId,
        out: &dyn Outbox,
    ) -> RelayResult<()> {
        if to.is_empty() {
            return Err(RelayError::MissingField("to"));
        }
        let from = self.sender_in_call(session, &call_id)?;
        self.ensure_participant(session, &from, &call_id)?;

        let destination = self
            .rooms
            .session_for(&call_id, &to)
            .or_else(|| self.presence.lookup(&to));

        match destination {
            Some(dest) => {
                tracing::debug!(call_id = %call_id, from = %from, to = %to, "Relaying signal");
                out.deliver(
                    dest,
                    ServerMessage::WebrtcSignal {
                        from,
                        signal,
                        call_id,
                    },
                );
            }
            None => {
                tracing::debug!(call_id = %call_id, to = %to, "Signal target offline, dropped");
            }
        }
        Ok(())
    }

    fn on_invite_to_call(
        &mut self,
        session: SessionId,
        to: UserId,
        call_id: CallId,
        caller_name: String,
        out: &dyn Outbox,
    ) -> RelayResult<()> {
        if to.is_empty() {
            return Err(RelayError::MissingField("to"));
        }
        let from = self.sender_in_call(session, &call_id)?;

        let in_room = self.rooms.member_user(&call_id, session).is_some();
        let joined = self.presence.user_of(session).is_some();
        let call = self
            .calls
            .get_mut(&call_id)
            .ok_or_else(|| RelayError::UnknownCall(call_id.clone()))?;
        if !call.state.is_live() {
            return Err(RelayError::CallClosed(call_id));
        }
        if !(joined && call.is_party(&from)) && !in_room {
            return Err(RelayError::NotAParty {
                call_id,
                user: from,
            });
        }
        call.invited.insert(to.clone());

        tracing::info!(call_id = %call_id, from = %from, to = %to, "Invited to call");
        self.send_to_user(
            &to,
            ServerMessage::GroupCallInvite {
                from,
                call_id,
                caller_name,
            },
            out,
        );
        Ok(())
    }

    // ── Group rooms ───────────────────────────────────────────────────────

    fn on_join_group_call(
        &mut self,
        session: SessionId,
        call_id: CallId,
        user_id: UserId,
        signal: Value,
        out: &dyn Outbox,
    ) -> RelayResult<()> {
        if call_id.is_empty() {
            return Err(RelayError::MissingField("callId"));
        }
        if user_id.is_empty() {
            return Err(RelayError::MissingField("userId"));
        }

        let user = match self.presence.user_of(session) {
            Some(bound) => {
                warn_on_spoofed_sender(session, bound, Some(&user_id));
                bound.clone()
            }
            None => {
                self.ensure_unclaimed(session, &call_id, &user_id)?;
                user_id
            }
        };

        match self.rooms.join(&call_id, session, user.clone()) {
            JoinOutcome::Joined { others } => {
                for (member, _) in others {
                    out.deliver(
                        member,
                        ServerMessage::UserJoinedCall {
                            call_id: call_id.clone(),
                            user_id: user.clone(),
                            signal: signal.clone(),
                        },
                    );
                }
                Ok(())
            }
            JoinOutcome::AlreadyMember => {
                tracing::debug!(call_id = %call_id, session = %session, "Already in group room");
                Ok(())
            }
            JoinOutcome::Full => Err(RelayError::RoomFull(call_id)),
        }
    }

    fn on_leave_group_call(
        &mut self,
        session: SessionId,
        call_id: CallId,
        out: &dyn Outbox,
    ) -> RelayResult<()> {
        let departure = self
            .rooms
            .leave(&call_id, session)
            .ok_or_else(|| RelayError::UnknownCall(call_id.clone()))?;

        for member in departure.remaining {
            out.deliver(
                member,
                ServerMessage::UserLeftCall {
                    call_id: departure.call_id.clone(),
                    user_id: departure.user.clone(),
                },
            );
        }
        Ok(())
    }

    // ── Shared helpers ────────────────────────────────────────────────────

    /// Run a transition, mapping a missing call or invalid move to an error.
    pub(crate) fn apply(&mut self, call_id: &CallId, event: CallEvent) -> RelayResult<()> {
        match self.calls.apply(call_id, event, Utc::now()) {
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => Err(e.into()),
            None => Err(RelayError::UnknownCall(call_id.clone())),
        }
    }

    /// An unjoined session may enter a room under `user` only if nobody
    /// else holds that id: not a present user, not a party of the call.
    fn ensure_unclaimed(
        &self,
        session: SessionId,
        call_id: &CallId,
        user: &UserId,
    ) -> RelayResult<()> {
        let present = self.presence.lookup(user).is_some();
        let party = self
            .calls
            .get(call_id)
            .is_some_and(|call| call.is_party(user));
        if present || party {
            return Err(RelayError::IdentityTaken {
                session,
                user: user.clone(),
            });
        }
        Ok(())
    }

    /// A signal for `call_id` is allowed while the call is live and the
    /// sender belongs to it. Party status needs a `join` binding; a
    /// room-only identity counts as a room member and nothing more.
    fn ensure_participant(
        &self,
        session: SessionId,
        user: &UserId,
        call_id: &CallId,
    ) -> RelayResult<()> {
        let in_room = self.rooms.member_user(call_id, session).is_some();
        let joined = self.presence.user_of(session) == Some(user);
        match self.calls.get(call_id) {
            Some(call) if call.state.is_terminal() => Err(RelayError::CallClosed(call_id.clone())),
            Some(call) if (joined && call.is_party(user)) || in_room => Ok(()),
            Some(_) => Err(RelayError::NotAParty {
                call_id: call_id.clone(),
                user: user.clone(),
            }),
            None if in_room => Ok(()),
            None => Err(RelayError::UnknownCall(call_id.clone())),
        }
    }

    pub(crate) fn send_to_user(
        &self,
        user: &UserId,
        message: ServerMessage,
        out: &dyn Outbox,
    ) -> bool {
        match self.presence.lookup(user) {
            Some(session) => out.deliver(session, message),
            None => {
                tracing::debug!(user = %user, "Routing miss, user not present");
                false
            }
        }
    }

    /// Deliver `message` once to every session taking part in `call_id`
    /// except `exclude`: both principals, present invitees and room members.
    pub(crate) fn fan_out(
        &self,
        call_id: &CallId,
        exclude: SessionId,
        message: ServerMessage,
        out: &dyn Outbox,
    ) {
        let mut targets = BTreeSet::new();

        if let Some(call) = self.calls.get(call_id) {
            targets.insert(call.initiator.session);
            targets.insert(call.target.session);
            targets.extend(call.invited.iter().filter_map(|u| self.presence.lookup(u)));
        }
        targets.extend(self.rooms.members(call_id));
        targets.remove(&exclude);

        for session in targets {
            out.deliver(session, message.clone());
        }
    }
}

fn warn_on_spoofed_sender(session: SessionId, registered: &UserId, claimed: Option<&UserId>) {
    if let Some(claimed) = claimed {
        if claimed != registered {
            tracing::warn!(
                session = %session,
                registered = %registered,
                claimed = %claimed,
                "Client-supplied sender ignored"
            );
        }
    }
}
