//! Call lifecycle: disconnect cleanup, ring timeout and sweep.
//!
//! A session going away ends every live call it placed or answered and
//! takes it out of every group room. Stale disconnects, where the user has
//! already come back on a newer session, leave presence alone.

use chrono::Utc;

use crate::call::{CallEvent, CallState};
use crate::protocol::{CallId, ServerMessage, SessionId};
use crate::relay::{Outbox, Relay};

impl Relay {
    /// Clean up after a transport-level disconnect.
    pub fn disconnect(&mut self, session: SessionId, out: &dyn Outbox) {
        if let Some(user) = self.presence.forget_session(session) {
            if self.presence.remove_if_current(&user, session) {
                tracing::info!(session = %session, user = %user, "User left");
            } else {
                tracing::debug!(
                    session = %session,
                    user = %user,
                    "Stale disconnect, newer session keeps presence"
                );
            }
        }

        for call_id in self.calls.live_calls_for_session(session) {
            if let Err(e) = self.apply(&call_id, CallEvent::Disconnect) {
                tracing::debug!(call_id = %call_id, error = %e, "Disconnect cleanup skipped");
                continue;
            }
            tracing::info!(call_id = %call_id, session = %session, "Call ended by disconnect");
            let ended = ServerMessage::CallEnded {
                call_id: call_id.clone(),
            };
            self.fan_out(&call_id, session, ended, out);
        }

        for departure in self.rooms.leave_all(session) {
            for member in departure.remaining {
                out.deliver(
                    member,
                    ServerMessage::UserLeftCall {
                        call_id: departure.call_id.clone(),
                        user_id: departure.user.clone(),
                    },
                );
            }
        }
    }

    /// Give up on a call nobody answered. No-op unless it is still ringing.
    pub fn ring_timeout(&mut self, call_id: &CallId, out: &dyn Outbox) {
        let ringing = self
            .calls
            .get(call_id)
            .map(|c| c.state == CallState::Ringing)
            .unwrap_or(false);
        if !ringing {
            return;
        }

        if let Err(e) = self.apply(call_id, CallEvent::Timeout) {
            tracing::debug!(call_id = %call_id, error = %e, "Ring timeout skipped");
            return;
        }

        tracing::info!(call_id = %call_id, "Call timed out while ringing");
        if let Some(call) = self.calls.get(call_id) {
            for session in [call.initiator.session, call.target.session] {
                out.deliver(
                    session,
                    ServerMessage::CallTimeout {
                        call_id: call_id.clone(),
                    },
                );
            }
        }
    }

    /// Forget terminal calls past the retention window.
    pub fn sweep(&mut self) -> usize {
        let removed = self
            .calls
            .sweep(self.config.call_retention_secs, Utc::now());
        if removed > 0 {
            tracing::debug!(count = removed, "Swept finished calls");
        }
        removed
    }
}
