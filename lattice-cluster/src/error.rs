//! Cluster error types.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

use crate::peer::PeerState;

/// Cluster-layer errors.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to serialize or deserialize a packet.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Packet exceeds maximum allowed size.
    #[error("Packet too large: {size} bytes (max: {max})")]
    PacketTooLarge {
        /// Observed frame size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Invalid network magic bytes.
    #[error("Invalid network magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic {
        /// Magic this node speaks.
        expected: [u8; 4],
        /// Magic the peer sent.
        actual: [u8; 4],
    },

    /// Outbound dial failed.
    #[error("Connect to {addr} failed: {reason}")]
    ConnectFailed {
        /// Address being dialed.
        addr: SocketAddr,
        /// Underlying failure.
        reason: String,
    },

    /// Outbound dial timed out.
    #[error("Connection timeout to {addr}")]
    ConnectTimeout {
        /// Address being dialed.
        addr: SocketAddr,
    },

    /// TLS handshake failed.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The peer completed the handshake without presenting a certificate.
    #[error("Peer presented no certificate")]
    NoPeerCertificate,

    /// TLS configuration or certificate loading failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Operation requires a different peer state.
    #[error("Peer not ready: expected {expected}, found {found}")]
    NotReady {
        /// State the operation requires.
        expected: PeerState,
        /// State the peer was in.
        found: PeerState,
    },

    /// The peer has no open transport.
    #[error("Peer is not connected")]
    NotConnected,

    /// No reply arrived within the deadline.
    #[error("Timed out waiting for reply")]
    ReplyTimeout,

    /// The peer disconnected while a reply was outstanding.
    #[error("Peer disconnected")]
    Disconnected,

    /// A reply carried an unexpected command.
    #[error("Unexpected reply command: {0}")]
    UnexpectedReply(u16),

    /// Channel send error.
    #[error("Channel send error: {0}")]
    ChannelSend(String),
}

impl From<lattice_core::SerializationError> for ClusterError {
    fn from(err: lattice_core::SerializationError) -> Self {
        ClusterError::Serialization(err.to_string())
    }
}

/// Result type for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;
