//! Deterministic binary serialization for the Lattice wire protocol.
//!
//! All protocol data structures are serialized using bincode with a
//! deterministic configuration. This ensures:
//! - Same input always produces same output across all nodes
//! - Cross-platform consistency
//! - Compact binary representation

mod bincode_config;

pub use bincode_config::{deserialize, serialize, serialized_size};
