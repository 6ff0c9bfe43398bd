//! Node membership descriptor.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use lattice_core::NodeId;

/// A node's self-announcement: identity plus the address other nodes
/// should dial to reach it.
///
/// This is the payload of the distribution exchange performed when two
/// nodes connect, and the value stored per node in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Unique identifier of the node.
    pub id: NodeId,
    /// Advertised address the node accepts cluster connections on.
    pub host_addr: SocketAddr,
}

impl NodeDescriptor {
    /// Create a descriptor.
    pub fn new(id: NodeId, host_addr: SocketAddr) -> Self {
        Self { id, host_addr }
    }
}

impl fmt::Display for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.id, self.host_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let id = NodeId::from_bytes([0xab; 16]);
        let desc = NodeDescriptor::new(id, "127.0.0.1:7400".parse().unwrap());
        let text = desc.to_string();
        assert!(text.contains("abab"));
        assert!(text.contains("127.0.0.1:7400"));
    }
}
