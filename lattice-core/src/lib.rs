//! # Lattice Core
//!
//! Core types and serialization for the Lattice clustered key-value store.
//!
//! This crate provides the foundation for all other Lattice crates:
//! - 128-bit node identifiers
//! - Deterministic binary serialization for the wire protocol
//! - Core error types

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod node_id;
pub mod serialization;

// Re-export commonly used types at crate root
pub use error::{CoreError, NodeIdError, SerializationError};
pub use node_id::NodeId;
