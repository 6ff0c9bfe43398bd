//! Main cluster node orchestrator.
//!
//! Owns the listener and the event loop. Peers report membership events
//! over a channel; the loop reacts by registering, re-gossiping, and
//! dialing addresses learned from peerlists. Key-value operations are
//! routed through the ring: keys owned locally hit the store, keys owned
//! by a peer are forwarded over its link.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use lattice_core::NodeId;
use lattice_ring::{HashRing, NodeDescriptor};
use lattice_store::KvStore;

use crate::config::ClusterConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::peer::{Peer, PeerEvent};
use crate::protocol::Packet;
use crate::registry::PeerRegistry;
use crate::tls::TlsContext;

/// Capacity of the peer event channel.
const EVENT_CHANNEL_SIZE: usize = 256;

/// Shared state handed to every peer: configuration, transport, local
/// identity, and the collaborators packets are dispatched to.
pub(crate) struct ClusterContext {
    pub(crate) config: Arc<ClusterConfig>,
    pub(crate) tls: TlsContext,
    pub(crate) local: NodeDescriptor,
    pub(crate) store: Arc<KvStore>,
    pub(crate) ring: Arc<HashRing>,
    pub(crate) registry: Arc<PeerRegistry>,
    pub(crate) events: mpsc::Sender<PeerEvent>,
}

impl ClusterContext {
    /// Find the peer that owns `key`, or `None` when the key is served
    /// locally.
    ///
    /// Keys owned by an unregistered node (e.g. one that just
    /// disconnected) fall back to local service rather than failing.
    pub(crate) fn route(&self, key: &str) -> Option<Peer> {
        let owner = self.ring.node_for_key(key)?;
        if owner.id == self.local.id {
            return None;
        }
        match self.registry.get(&owner.id) {
            Some(peer) => Some(peer),
            None => {
                tracing::debug!(node = %owner.id, key, "Key owner not registered, serving locally");
                None
            }
        }
    }
}

/// Dial `addr` and start the peer in a background task.
///
/// The registry's connecting set guarantees at most one in-flight dial per
/// address, so flood gossip cannot dial the same peer twice concurrently.
pub(crate) fn spawn_connect(ctx: Arc<ClusterContext>, addr: SocketAddr) {
    if addr == ctx.config.advertised() {
        tracing::warn!(addr = %addr, "Refusing to connect to our own address");
        return;
    }
    if !ctx.registry.start_connecting(addr) {
        tracing::debug!(addr = %addr, "Already connected or connecting");
        return;
    }

    tokio::spawn(async move {
        let peer = Peer::outbound(ctx.clone(), addr);
        let result = async {
            peer.connect().await?;
            peer.start().await
        }
        .await;
        ctx.registry.stop_connecting(&addr);

        if let Err(e) = result {
            tracing::warn!(addr = %addr, error = %e, "Outbound connection failed");
            peer.disconnect().await;
        }
    });
}

/// The cluster node.
pub struct ClusterNode {
    ctx: Arc<ClusterContext>,
    events_rx: Option<mpsc::Receiver<PeerEvent>>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Option<mpsc::Receiver<()>>,
    bound_addr_tx: Option<oneshot::Sender<SocketAddr>>,
}

impl ClusterNode {
    /// Create a node, loading TLS material from the paths in `config`.
    pub fn new(
        config: ClusterConfig,
        store: Arc<KvStore>,
        ring: Arc<HashRing>,
    ) -> ClusterResult<Self> {
        let tls = TlsContext::from_settings(&config.tls)?;
        Ok(Self::with_tls_context(config, tls, store, ring))
    }

    /// Create a node with an already-built TLS context.
    pub fn with_tls_context(
        config: ClusterConfig,
        tls: TlsContext,
        store: Arc<KvStore>,
        ring: Arc<HashRing>,
    ) -> Self {
        let config = Arc::new(config);
        let local = NodeDescriptor::new(config.node_id, config.advertised());
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        // The local node owns its share of the key space from the start.
        if let Err(e) = ring.register_node(local) {
            tracing::warn!(node = %local.id, error = %e, "Local ring registration failed");
        }

        let ctx = Arc::new(ClusterContext {
            config,
            tls,
            local,
            store,
            ring,
            registry: Arc::new(PeerRegistry::new()),
            events,
        });

        Self {
            ctx,
            events_rx: Some(events_rx),
            shutdown_tx,
            shutdown_rx: Some(shutdown_rx),
            bound_addr_tx: None,
        }
    }

    /// Get a oneshot receiver that yields the bound address once the
    /// listener is up. Useful when binding to port 0.
    pub fn bound_addr_receiver(&mut self) -> oneshot::Receiver<SocketAddr> {
        let (tx, rx) = oneshot::channel();
        self.bound_addr_tx = Some(tx);
        rx
    }

    /// Get a cloneable handle for interacting with the running node.
    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            ctx: self.ctx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Run the node until shutdown.
    pub async fn run(mut self) -> ClusterResult<()> {
        let listener = TcpListener::bind(self.ctx.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(
            addr = %local_addr,
            node = %self.ctx.local.id,
            "Cluster node listening"
        );

        if let Some(tx) = self.bound_addr_tx.take() {
            let _ = tx.send(local_addr);
        }

        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .ok_or_else(|| ClusterError::ChannelSend("shutdown receiver gone".into()))?;
        let mut events_rx = self
            .events_rx
            .take()
            .ok_or_else(|| ClusterError::ChannelSend("event receiver gone".into()))?;

        // Dial the bootstrap peers.
        for addr in self.ctx.config.bootstrap_peers.clone() {
            spawn_connect(self.ctx.clone(), addr);
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Cluster node shutting down");
                    self.shutdown_peers().await;
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, remote)) => self.accept_peer(stream, remote),
                        Err(e) => tracing::warn!(error = %e, "Accept error"),
                    }
                }

                Some(event) = events_rx.recv() => {
                    self.handle_event(event).await;
                }
            }
        }

        Ok(())
    }

    /// Complete the TLS handshake and start an inbound peer.
    fn accept_peer(&self, stream: tokio::net::TcpStream, remote: SocketAddr) {
        tracing::debug!(addr = %remote, "Inbound connection");
        let ctx = self.ctx.clone();

        tokio::spawn(async move {
            match ctx.tls.accept(stream).await {
                Ok(tls_stream) => {
                    let peer = Peer::inbound(ctx.clone(), remote, tls_stream);
                    if let Err(e) = peer.start().await {
                        tracing::warn!(addr = %remote, error = %e, "Inbound peer start failed");
                        peer.disconnect().await;
                    }
                }
                Err(e) => {
                    tracing::warn!(addr = %remote, error = %e, "Inbound handshake failed");
                }
            }
        });
    }

    /// Handle a peer event.
    async fn handle_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::NewPeer { peer } => {
                tracing::info!(
                    addr = %peer.addr(),
                    node = %peer.descriptor().map(|d| d.id.to_string()).unwrap_or_default(),
                    "Peer registered"
                );
                self.gossip_peerlist().await;
            }

            PeerEvent::PeerList { from, addrs } => {
                for addr in addrs {
                    if addr == self.ctx.config.advertised() {
                        tracing::warn!(from = %from, addr = %addr, "Peer gossiped our own address");
                        continue;
                    }
                    if self.ctx.registry.is_connected_to(&addr) {
                        tracing::debug!(addr = %addr, "Already connected to gossiped peer");
                        continue;
                    }
                    tracing::debug!(from = %from, addr = %addr, "Connecting to gossiped peer");
                    spawn_connect(self.ctx.clone(), addr);
                }
            }

            PeerEvent::Disconnected { addr, node_id } => {
                tracing::debug!(
                    addr = %addr,
                    node = %node_id.map(|id| id.to_string()).unwrap_or_default(),
                    "Peer gone"
                );
            }
        }
    }

    /// Push a fresh peerlist to every registered peer.
    ///
    /// Runs whenever a new peer registers; this is what lets the mesh
    /// converge without a central directory. O(peers) sends per new peer.
    async fn gossip_peerlist(&self) {
        let addrs = self.ctx.registry.advertised_addrs();
        let packet = match Packet::peerlist(&addrs) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build peerlist packet");
                return;
            }
        };

        // Pushes run in their own tasks so one wedged transport cannot
        // stall the event loop.
        for peer in self.ctx.registry.peers() {
            let packet = packet.clone();
            tokio::spawn(async move {
                if let Err(e) = peer.send_packet(packet).await {
                    tracing::debug!(addr = %peer.addr(), error = %e, "Peerlist push failed");
                }
            });
        }
    }

    /// Disconnect all registered peers.
    async fn shutdown_peers(&self) {
        let peers = self.ctx.registry.peers();
        tracing::info!(count = peers.len(), "Disconnecting peers");
        for peer in peers {
            peer.disconnect().await;
        }
    }
}

/// Cloneable handle to a running [`ClusterNode`].
#[derive(Clone)]
pub struct NodeHandle {
    ctx: Arc<ClusterContext>,
    shutdown_tx: mpsc::Sender<()>,
}

impl NodeHandle {
    /// This node's identifier.
    pub fn node_id(&self) -> NodeId {
        self.ctx.local.id
    }

    /// The address this node advertises to peers.
    pub fn advertised_addr(&self) -> SocketAddr {
        self.ctx.config.advertised()
    }

    /// Number of registered peers.
    pub fn peer_count(&self) -> usize {
        self.ctx.registry.len()
    }

    /// Check if a peer advertising `addr` is registered.
    pub fn is_connected_to(&self, addr: &SocketAddr) -> bool {
        self.ctx.registry.is_connected_to(addr)
    }

    /// Dial a peer.
    pub fn connect_to(&self, addr: SocketAddr) {
        spawn_connect(self.ctx.clone(), addr);
    }

    /// Store a value under `key` on whichever node owns it.
    pub async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        flags: u32,
        expires_at: u64,
    ) -> ClusterResult<()> {
        match self.ctx.route(key) {
            Some(peer) => peer.remote_set(key, value, flags, expires_at).await,
            None => {
                self.ctx.store.set(key, value, flags, expires_at);
                Ok(())
            }
        }
    }

    /// Fetch `key` from whichever node owns it.
    pub async fn get(&self, key: &str) -> ClusterResult<Option<(Vec<u8>, u32)>> {
        match self.ctx.route(key) {
            Some(peer) => peer.remote_get(key).await,
            None => Ok(self.ctx.store.get(key)),
        }
    }

    /// Delete `key` on whichever node owns it. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> ClusterResult<bool> {
        match self.ctx.route(key) {
            Some(peer) => peer.remote_delete(key).await,
            None => Ok(self.ctx.store.delete(key)),
        }
    }

    /// Signal the node to shut down.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}
