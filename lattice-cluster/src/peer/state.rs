//! Peer state machine.

use std::fmt;

/// State of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerState {
    /// No transport; the initial and terminal state.
    #[default]
    Disconnected,
    /// Outbound dial in progress.
    Connecting,
    /// Transport established, protocol not yet started.
    Handshake,
    /// Steady state: heartbeats flowing, packets dispatched.
    Connected,
    /// Suspected failed: heartbeat silence crossed the soft threshold.
    Defib,
}

impl PeerState {
    /// Check if the peer has a live protocol session.
    pub fn is_live(&self) -> bool {
        matches!(self, PeerState::Connected | PeerState::Defib)
    }

    /// Check if the peer is in steady state.
    pub fn is_connected(&self) -> bool {
        matches!(self, PeerState::Connected)
    }

    /// Check if the peer is suspected failed.
    pub fn is_defib(&self) -> bool {
        matches!(self, PeerState::Defib)
    }

    /// Check if the peer has been torn down (or never connected).
    pub fn is_disconnected(&self) -> bool {
        matches!(self, PeerState::Disconnected)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Disconnected => write!(f, "disconnected"),
            PeerState::Connecting => write!(f, "connecting"),
            PeerState::Handshake => write!(f, "handshake"),
            PeerState::Connected => write!(f, "connected"),
            PeerState::Defib => write!(f, "defib"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_checks() {
        assert!(PeerState::Disconnected.is_disconnected());
        assert!(!PeerState::Disconnected.is_live());

        assert!(PeerState::Connected.is_connected());
        assert!(PeerState::Connected.is_live());
        assert!(!PeerState::Connected.is_defib());

        assert!(PeerState::Defib.is_live());
        assert!(PeerState::Defib.is_defib());
        assert!(!PeerState::Defib.is_connected());

        assert!(!PeerState::Handshake.is_live());
    }

    #[test]
    fn test_display() {
        assert_eq!(PeerState::Defib.to_string(), "defib");
        assert_eq!(PeerState::Handshake.to_string(), "handshake");
    }
}
