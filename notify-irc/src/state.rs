//! Connection readiness and keep-alive handling.

use tracing::{debug, info};

use crate::protocol::{ClientCommand, is_auth_notice, ping_payload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Ready,
}

impl ConnectionState {
    /// Next state and optional reply for one server line.
    pub fn transition(self, line: &str) -> (Self, Option<ClientCommand>) {
        match self {
            Self::Connecting if is_auth_notice(line) => (Self::Ready, None),
            Self::Connecting => (Self::Connecting, None),
            Self::Ready => {
                let reply = ping_payload(line).map(|payload| ClientCommand::Pong {
                    payload: payload.to_string(),
                });
                (Self::Ready, reply)
            }
        }
    }
}

/// Owns the connection state; the only place it changes.
#[derive(Debug, Default)]
pub struct ProtocolStateMachine {
    state: ConnectionState,
}

impl ProtocolStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Observes a server line and returns the reply to send, if any.
    pub fn handle_line(&mut self, line: &str) -> Option<ClientCommand> {
        debug!(line, "received from server");
        let (next, reply) = self.state.transition(line);
        if next != self.state {
            info!(from = ?self.state, to = ?next, "connection state changed");
            self.state = next;
        }
        reply
    }
}
