//! Consistent-hash membership directory.
//!
//! Maps cluster node identifiers to network addresses and key-ownership
//! ranges. Each node registers the descriptors it learns from distribution
//! exchanges and asks the ring which node owns a given key.
//!
//! The ring places a fixed number of virtual points per node on a u64
//! circle; a key is owned by the node whose point follows the key's hash.

#![deny(unsafe_code)]

mod descriptor;
mod ring;

pub use descriptor::NodeDescriptor;
pub use ring::{HashRing, RingError, RingResult, VIRTUAL_POINTS};
