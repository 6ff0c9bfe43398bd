//! The consistent-hash ring.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

use thiserror::Error;

use lattice_core::NodeId;

use crate::descriptor::NodeDescriptor;

/// Virtual points placed on the ring per registered node.
pub const VIRTUAL_POINTS: usize = 64;

/// Errors from ring operations.
#[derive(Debug, Error)]
pub enum RingError {
    /// The node id is already registered.
    #[error("node {0} is already registered")]
    AlreadyRegistered(NodeId),

    /// The node id is not registered.
    #[error("node {0} is not registered")]
    NotRegistered(NodeId),
}

/// Result type for ring operations.
pub type RingResult<T> = Result<T, RingError>;

#[derive(Debug, Default)]
struct RingInner {
    nodes: HashMap<NodeId, NodeDescriptor>,
    points: BTreeMap<u64, NodeId>,
}

/// Consistent-hash ring mapping keys to owning nodes.
///
/// Thread-safe; registration and lookups may happen concurrently from
/// different peer tasks.
#[derive(Debug, Default)]
pub struct HashRing {
    inner: RwLock<RingInner>,
}

fn hash_one<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

impl HashRing {
    /// Create an empty ring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node, placing its virtual points on the ring.
    ///
    /// Returns an error if the id is already registered; callers that see a
    /// node reconnect must deregister the stale entry first.
    pub fn register_node(&self, descriptor: NodeDescriptor) -> RingResult<()> {
        let mut inner = self.inner.write().expect("ring lock poisoned");

        if inner.nodes.contains_key(&descriptor.id) {
            return Err(RingError::AlreadyRegistered(descriptor.id));
        }

        for point in 0..VIRTUAL_POINTS {
            let position = hash_one(&(descriptor.id, point as u64));
            inner.points.insert(position, descriptor.id);
        }
        inner.nodes.insert(descriptor.id, descriptor);

        Ok(())
    }

    /// Remove a node and all of its virtual points.
    pub fn deregister_node(&self, id: &NodeId) -> RingResult<NodeDescriptor> {
        let mut inner = self.inner.write().expect("ring lock poisoned");

        let descriptor = inner.nodes.remove(id).ok_or(RingError::NotRegistered(*id))?;
        inner.points.retain(|_, owner| owner != id);

        Ok(descriptor)
    }

    /// Look up the node that owns a key.
    ///
    /// Returns `None` when the ring is empty. Ownership is the first
    /// virtual point at or after the key's hash, wrapping at the top.
    pub fn node_for_key(&self, key: &str) -> Option<NodeDescriptor> {
        let inner = self.inner.read().expect("ring lock poisoned");

        if inner.points.is_empty() {
            return None;
        }

        let position = hash_one(&key);
        let owner = inner
            .points
            .range(position..)
            .next()
            .or_else(|| inner.points.iter().next())
            .map(|(_, id)| *id)?;

        inner.nodes.get(&owner).copied()
    }

    /// Get a registered node's descriptor.
    pub fn get(&self, id: &NodeId) -> Option<NodeDescriptor> {
        self.inner
            .read()
            .expect("ring lock poisoned")
            .nodes
            .get(id)
            .copied()
    }

    /// Check whether a node is registered.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.inner
            .read()
            .expect("ring lock poisoned")
            .nodes
            .contains_key(id)
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.inner.read().expect("ring lock poisoned").nodes.len()
    }

    /// Check if no nodes are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
