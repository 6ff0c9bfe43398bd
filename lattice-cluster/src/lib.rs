//! Peer-to-peer transport and protocol layer for the Lattice cluster.
//!
//! This crate provides the inter-node networking for a clustered key-value
//! store:
//!
//! - Mutually authenticated TLS links between nodes
//! - A framed packet protocol carrying typed commands
//! - A heartbeat failure detector with two-stage escalation
//! - Request/reply correlation for commands expecting a response
//! - Gossip-driven mesh formation via peerlist exchange
//! - Key-routed forwarding of set/get/delete to the owning node
//!
//! # Architecture
//!
//! The layer uses a task-per-peer architecture: each connected peer runs a
//! heartbeat loop and a receive loop in their own tokio tasks. Membership
//! events flow over a channel to the node's main loop.
//!
//! ```text
//! Main Task (ClusterNode::run())
//! ├── Listener (accept + TLS handshake)
//! ├── Peer Task 1 (receive loop)
//! ├── Peer Task 1 (heartbeat loop)
//! ├── Peer Task 2 (receive loop)
//! └── Peer Task 2 (heartbeat loop)
//! ```

pub mod config;
pub mod error;

pub mod node;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod tls;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export main types
pub use config::{ClusterConfig, MAX_PACKET_SIZE, NETWORK_MAGIC};
pub use error::{ClusterError, ClusterResult};
pub use node::{ClusterNode, NodeHandle};
pub use peer::{Peer, PeerEvent, PeerState};
pub use protocol::{Command, KvCommand, KvPacket, Packet, PacketId};
pub use registry::PeerRegistry;
pub use tls::{TlsContext, TlsSettings};
