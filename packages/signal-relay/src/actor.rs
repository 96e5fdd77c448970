//! Relay actor.
//!
//! A single tokio task owns the [`Relay`] and drains a command channel, so
//! every client message, disconnect and timer is applied one at a time and
//! to completion. Connection tasks only ever talk to it through a
//! [`RelayHandle`].

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::protocol::{CallId, ClientMessage, ServerMessage, SessionId};
use crate::relay::{Outbox, Relay, RelayStats};
use crate::state::{RelayConfig, SessionDirectory};

/// Work items for the relay actor.
#[derive(Debug)]
pub enum RelayCommand {
    Inbound {
        session: SessionId,
        message: ClientMessage,
    },
    Disconnected {
        session: SessionId,
    },
    RingTimeout {
        call_id: CallId,
    },
    Sweep,
    Stats {
        reply: oneshot::Sender<RelayStats>,
    },
}

/// Cloneable handle to the relay actor.
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<RelayCommand>,
}

impl RelayHandle {
    pub fn submit(&self, session: SessionId, message: ClientMessage) {
        self.send(RelayCommand::Inbound { session, message });
    }

    pub fn disconnected(&self, session: SessionId) {
        self.send(RelayCommand::Disconnected { session });
    }

    pub fn sweep(&self) {
        self.send(RelayCommand::Sweep);
    }

    /// Snapshot of the relay counters. `None` if the actor has stopped.
    pub async fn stats(&self) -> Option<RelayStats> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Stats { reply });
        rx.await.ok()
    }

    fn send(&self, command: RelayCommand) {
        if self.tx.send(command).is_err() {
            tracing::error!("Relay actor has stopped");
        }
    }
}

/// Outbox used inside the actor: session directory for delivery, tokio
/// sleeps for ring timers.
struct LiveOutbox {
    sessions: SessionDirectory,
    commands: mpsc::WeakUnboundedSender<RelayCommand>,
}

impl Outbox for LiveOutbox {
    fn deliver(&self, session: SessionId, message: ServerMessage) -> bool {
        self.sessions.deliver(session, message)
    }

    fn arm_ring_timer(&self, call_id: &CallId, after: Duration) {
        let commands = self.commands.clone();
        let call_id = call_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            // Actor gone means the process is shutting down
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(RelayCommand::RingTimeout { call_id });
            }
        });
    }
}

/// Start the relay actor on the current runtime.
pub fn spawn(config: RelayConfig, sessions: SessionDirectory) -> RelayHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let outbox = LiveOutbox {
        sessions,
        commands: tx.downgrade(),
    };
    tokio::spawn(run(Relay::new(config), outbox, rx));
    RelayHandle { tx }
}

async fn run(
    mut relay: Relay,
    outbox: LiveOutbox,
    mut rx: mpsc::UnboundedReceiver<RelayCommand>,
) {
    tracing::debug!("Relay actor started");

    while let Some(command) = rx.recv().await {
        match command {
            RelayCommand::Inbound { session, message } => {
                relay.handle(session, message, &outbox);
            }
            RelayCommand::Disconnected { session } => {
                relay.disconnect(session, &outbox);
            }
            RelayCommand::RingTimeout { call_id } => {
                relay.ring_timeout(&call_id, &outbox);
            }
            RelayCommand::Sweep => {
                relay.sweep();
            }
            RelayCommand::Stats { reply } => {
                let _ = reply.send(relay.stats());
            }
        }
    }

    tracing::debug!("Relay actor stopped");
}
