//! Node identification.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NodeIdError;

/// Unique 128-bit identifier for a cluster node.
///
/// Generated randomly at node startup and announced to peers in the
/// distribution exchange. The identifier keys the peer registry and the
/// consistent-hash ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 16]);

impl NodeId {
    /// Create a node ID from raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random node ID.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(NodeIdError::InvalidLength(s.len()));
        }

        let mut bytes = [0u8; 16];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk).map_err(|_| NodeIdError::InvalidHex)?;
            bytes[i] = u8::from_str_radix(hex, 16).map_err(|_| NodeIdError::InvalidHex)?;
        }

        Ok(Self(bytes))
    }
}
