//! Error types for the Lattice core crate.

use std::fmt;

/// Top-level error type for lattice-core operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoreError {
    /// Serialization or deserialization failed.
    Serialization(SerializationError),
    /// Invalid node identifier string.
    NodeId(NodeIdError),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Serialization(e) => write!(f, "serialization error: {}", e),
            CoreError::NodeId(e) => write!(f, "node id error: {}", e),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<SerializationError> for CoreError {
    fn from(e: SerializationError) -> Self {
        CoreError::Serialization(e)
    }
}

impl From<NodeIdError> for CoreError {
    fn from(e: NodeIdError) -> Self {
        CoreError::NodeId(e)
    }
}

/// Errors related to serialization and deserialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SerializationError {
    /// Failed to encode data to bytes.
    EncodeFailed(String),
    /// Failed to decode data from bytes.
    DecodeFailed(String),
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::EncodeFailed(msg) => write!(f, "encode failed: {}", msg),
            SerializationError::DecodeFailed(msg) => write!(f, "decode failed: {}", msg),
        }
    }
}

impl std::error::Error for SerializationError {}

/// Errors related to node identifier parsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeIdError {
    /// The string is not 32 hex characters.
    InvalidLength(usize),
    /// The string contains a non-hex character.
    InvalidHex,
}

impl fmt::Display for NodeIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeIdError::InvalidLength(len) => {
                write!(f, "expected 32 hex characters, got {}", len)
            }
            NodeIdError::InvalidHex => write!(f, "invalid hex character"),
        }
    }
}

impl std::error::Error for NodeIdError {}
