//! Node configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use lattice_cluster::{ClusterConfig, TlsSettings};

use crate::cli::Cli;

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Cluster listen address.
    pub listen: SocketAddr,

    /// Address advertised to peers.
    pub advertise: Option<SocketAddr>,

    /// Path to the cluster CA certificate.
    pub ca: PathBuf,

    /// Path to this node's certificate.
    pub cert: PathBuf,

    /// Path to this node's private key.
    pub key: PathBuf,

    /// Seed nodes to join through.
    pub seed_nodes: Vec<SocketAddr>,

    /// Log level.
    pub log_level: String,
}

impl NodeConfig {
    /// Create a node configuration from CLI arguments.
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            listen: cli.listen,
            advertise: cli.advertise,
            ca: cli.ca.clone(),
            cert: cli.cert.clone(),
            key: cli.key.clone(),
            seed_nodes: cli.seed_nodes.clone().unwrap_or_default(),
            log_level: cli.log_level.clone(),
        }
    }

    /// Build the cluster configuration from node config.
    pub fn cluster_config(&self) -> ClusterConfig {
        let mut config = ClusterConfig::new(self.listen)
            .with_tls(TlsSettings::new(&self.cert, &self.key, &self.ca))
            .with_bootstrap_peers(self.seed_nodes.clone());

        if let Some(advertise) = self.advertise {
            config = config.with_advertise_addr(advertise);
        }

        config
    }
}
