//! Gateway session: connection state machine, heartbeating and the mapping
//! of dispatch events onto the entity cache.

mod events;
mod heartbeat;
mod session;
mod transport;

pub use events::apply_event;
pub use heartbeat::{Beat, Heartbeater, LatencyGauge};
pub(crate) use session::{SessionRunner, SessionShared};
pub use transport::{Connector, Transport, WsConnector, WsTransport};

/// Connection state of a session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    /// IDENTIFY sent, waiting for READY.
    Identifying,
    /// READY received; unavailable guilds are still streaming in.
    AwaitingSnapshot,
    Ready,
    Reconnecting {
        attempt: u32,
    },
    /// RESUME sent, waiting for RESUMED.
    Resuming,
    Closed,
    /// Stopped by a fatal close code. Only a new `connect` leaves this state.
    Failed {
        code: u16,
        reason: String,
    },
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    /// The transport is open and past the handshake.
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::AwaitingSnapshot | SessionState::Ready)
    }

    /// The session task has stopped and will not reconnect on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed { .. })
    }
}

/// What a resume needs: created on READY, dropped whenever the gateway or
/// the caller ends the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    /// Last dispatch sequence number seen.
    pub sequence: Option<u64>,
    pub resume_url: Option<String>,
    pub shard: [u32; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_predicates() {
        assert!(SessionState::Ready.is_ready());
        assert!(SessionState::AwaitingSnapshot.is_connected());
        assert!(!SessionState::Resuming.is_connected());
        assert!(!SessionState::Reconnecting { attempt: 1 }.is_terminal());
        assert!(!SessionState::Disconnected.is_terminal());
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Failed {
            code: 4004,
            reason: String::new()
        }
        .is_terminal());
    }
}
