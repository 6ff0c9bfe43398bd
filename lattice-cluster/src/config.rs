//! Cluster configuration.

use std::net::SocketAddr;
use std::time::Duration;

use lattice_core::NodeId;

use crate::tls::TlsSettings;

/// Network magic bytes identifying the Lattice cluster protocol.
pub const NETWORK_MAGIC: [u8; 4] = [0x4C, 0x54, 0x43, 0x45]; // "LTCE"

/// Maximum packet size in bytes (1 MB).
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Default interval between heartbeat ticks.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Default heartbeat silence before a peer is suspected (defib).
pub const DEFAULT_DEFIB_AFTER: Duration = Duration::from_secs(5);

/// Default heartbeat silence before a suspected peer is declared dead.
pub const DEFAULT_DEAD_AFTER: Duration = Duration::from_secs(10);

/// Default timeout for establishing outbound connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for request/reply round trips.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the cluster node.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// This node's identifier.
    pub node_id: NodeId,

    /// Address to bind the listener to.
    pub bind_addr: SocketAddr,

    /// Address advertised to peers in distribution and peerlist exchanges.
    ///
    /// Defaults to `bind_addr`; must be set explicitly when binding to a
    /// wildcard or ephemeral port.
    pub advertise_addr: Option<SocketAddr>,

    /// TLS certificate material.
    pub tls: TlsSettings,

    /// Initial peers to connect to (bootstrap nodes).
    pub bootstrap_peers: Vec<SocketAddr>,

    /// Interval between heartbeat ticks.
    pub heartbeat_interval: Duration,

    /// Heartbeat silence before a peer is suspected.
    pub defib_after: Duration,

    /// Heartbeat silence before a suspected peer is declared dead.
    pub dead_after: Duration,

    /// Timeout for establishing outbound connections.
    pub connect_timeout: Duration,

    /// Deadline for request/reply round trips.
    pub reply_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::generate(),
            bind_addr: "0.0.0.0:7400".parse().unwrap(),
            advertise_addr: None,
            tls: TlsSettings::default(),
            bootstrap_peers: Vec::new(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            defib_after: DEFAULT_DEFIB_AFTER,
            dead_after: DEFAULT_DEAD_AFTER,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

impl ClusterConfig {
    /// Create a new configuration with the specified bind address.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Set the node identifier.
    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = node_id;
        self
    }

    /// Set the advertised address.
    pub fn with_advertise_addr(mut self, addr: SocketAddr) -> Self {
        self.advertise_addr = Some(addr);
        self
    }

    /// Set the TLS certificate material.
    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = tls;
        self
    }

    /// Add bootstrap peers to connect to on startup.
    pub fn with_bootstrap_peers(mut self, peers: Vec<SocketAddr>) -> Self {
        self.bootstrap_peers = peers;
        self
    }

    /// Set the heartbeat tick interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the defib threshold.
    pub fn with_defib_after(mut self, after: Duration) -> Self {
        self.defib_after = after;
        self
    }

    /// Set the dead threshold.
    pub fn with_dead_after(mut self, after: Duration) -> Self {
        self.dead_after = after;
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the reply deadline.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// The address peers should be told to dial.
    pub fn advertised(&self) -> SocketAddr {
        self.advertise_addr.unwrap_or(self.bind_addr)
    }
}
