//! Node composition and lifecycle.

use std::sync::Arc;

use lattice_cluster::ClusterNode;
use lattice_ring::HashRing;
use lattice_store::KvStore;

use crate::config::NodeConfig;
use crate::shutdown::wait_for_shutdown_signal;

/// A composed Lattice node: storage engine, hash ring, and cluster layer.
pub struct Node {
    cluster: ClusterNode,
}

impl Node {
    /// Build the node from its configuration.
    pub fn new(config: NodeConfig) -> anyhow::Result<Self> {
        let store = Arc::new(KvStore::new());
        let ring = Arc::new(HashRing::new());

        let cluster = ClusterNode::new(config.cluster_config(), store, ring)?;

        Ok(Self { cluster })
    }

    /// Run until a shutdown signal arrives.
    pub async fn run(self) -> anyhow::Result<()> {
        let handle = self.cluster.handle();

        let cluster_task = tokio::spawn(self.cluster.run());

        wait_for_shutdown_signal().await;
        handle.shutdown().await;

        cluster_task.await??;
        tracing::info!("Node stopped");

        Ok(())
    }
}
