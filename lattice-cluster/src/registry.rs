//! Peer registry.
//!
//! Tracks live peers by node id (learned from distribution exchanges) and
//! by advertised address, plus the set of addresses with an in-flight
//! outbound dial so concurrent gossip never dials the same address twice.
//!
//! Shared across all peer tasks of a node; every mutation goes through the
//! internal lock.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Mutex;

use lattice_core::NodeId;
use lattice_ring::NodeDescriptor;

use crate::peer::Peer;

#[derive(Debug, Default)]
struct RegistryInner {
    by_id: HashMap<NodeId, Peer>,
    by_addr: HashMap<SocketAddr, NodeId>,
    connecting: HashSet<SocketAddr>,
}

/// Registry of live peers keyed by node id.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    inner: Mutex<RegistryInner>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer under its learned descriptor, replacing any
    /// previous entry for the same node id.
    pub fn insert(&self, descriptor: NodeDescriptor, peer: Peer) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.connecting.remove(&descriptor.host_addr);
        inner.by_addr.insert(descriptor.host_addr, descriptor.id);
        inner.by_id.insert(descriptor.id, peer);
    }

    /// Remove a peer's entry, but only if the registered connection is
    /// `peer` itself.
    ///
    /// Returns whether an entry was removed. The identity check keeps a
    /// stale connection's teardown from evicting the entry of a newer
    /// connection to the same node.
    pub fn remove(&self, id: &NodeId, peer: &Peer) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        match inner.by_id.get(id) {
            Some(registered) if registered.same_connection(peer) => {}
            _ => return false,
        }

        inner.by_id.remove(id);
        inner.by_addr.retain(|_, owner| owner != id);
        true
    }

    /// Look up a peer by node id.
    pub fn get(&self, id: &NodeId) -> Option<Peer> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .by_id
            .get(id)
            .cloned()
    }

    /// Check if a peer advertising `addr` is registered.
    pub fn is_connected_to(&self, addr: &SocketAddr) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .by_addr
            .contains_key(addr)
    }

    /// Check if an outbound dial to `addr` is in flight.
    pub fn is_connecting(&self, addr: &SocketAddr) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .connecting
            .contains(addr)
    }

    /// Claim an outbound dial to `addr`.
    ///
    /// Returns `false` when the address is already connected or already
    /// being dialed; the caller must then skip the dial.
    pub fn start_connecting(&self, addr: SocketAddr) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.by_addr.contains_key(&addr) {
            return false;
        }
        inner.connecting.insert(addr)
    }

    /// Release the dial claim on `addr`.
    pub fn stop_connecting(&self, addr: &SocketAddr) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .connecting
            .remove(addr);
    }

    /// Snapshot of all registered peers.
    pub fn peers(&self) -> Vec<Peer> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .by_id
            .values()
            .cloned()
            .collect()
    }

    /// Advertised addresses of all registered peers, for peerlist packets.
    pub fn advertised_addrs(&self) -> Vec<SocketAddr> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .by_addr
            .keys()
            .copied()
            .collect()
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .by_id
            .len()
    }

    /// Check if no peers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use lattice_core::NodeId;

    fn descriptor(byte: u8, port: u16) -> NodeDescriptor {
        NodeDescriptor::new(
            NodeId::from_bytes([byte; 16]),
            format!("127.0.0.1:{}", port).parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (ctx, _events) = testutil::context();
        let registry = PeerRegistry::new();
        let desc = descriptor(1, 7401);
        let peer = testutil::outbound_peer(&ctx, desc.host_addr);

        registry.insert(desc, peer.clone());

        assert_eq!(registry.len(), 1);
        assert!(registry.is_connected_to(&desc.host_addr));
        assert!(registry.get(&desc.id).unwrap().same_connection(&peer));
    }

    #[tokio::test]
    async fn test_remove_requires_same_connection() {
        let (ctx, _events) = testutil::context();
        let registry = PeerRegistry::new();
        let desc = descriptor(1, 7401);

        let first = testutil::outbound_peer(&ctx, desc.host_addr);
        let second = testutil::outbound_peer(&ctx, desc.host_addr);

        registry.insert(desc, first.clone());
        // A reconnect replaced the entry.
        registry.insert(desc, second.clone());

        // The stale connection's teardown must not evict the new entry.
        assert!(!registry.remove(&desc.id, &first));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&desc.id, &second));
        assert!(registry.is_empty());
        assert!(!registry.is_connected_to(&desc.host_addr));
    }

    #[tokio::test]
    async fn test_connecting_claims() {
        let registry = PeerRegistry::new();
        let addr: SocketAddr = "127.0.0.1:7401".parse().unwrap();

        assert!(registry.start_connecting(addr));
        // A second claim while in flight must fail.
        assert!(!registry.start_connecting(addr));
        assert!(registry.is_connecting(&addr));

        registry.stop_connecting(&addr);
        assert!(registry.start_connecting(addr));
    }

    #[tokio::test]
    async fn test_connected_address_cannot_be_claimed() {
        let (ctx, _events) = testutil::context();
        let registry = PeerRegistry::new();
        let desc = descriptor(1, 7401);

        registry.insert(desc, testutil::outbound_peer(&ctx, desc.host_addr));

        assert!(!registry.start_connecting(desc.host_addr));
    }

    #[tokio::test]
    async fn test_advertised_addrs() {
        let (ctx, _events) = testutil::context();
        let registry = PeerRegistry::new();

        for i in 1..=3u8 {
            let desc = descriptor(i, 7400 + i as u16);
            registry.insert(desc, testutil::outbound_peer(&ctx, desc.host_addr));
        }

        let mut addrs = registry.advertised_addrs();
        addrs.sort();
        assert_eq!(addrs.len(), 3);
        assert_eq!(addrs[0], "127.0.0.1:7401".parse().unwrap());
    }
}
