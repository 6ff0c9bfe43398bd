//! Lattice cluster node binary.
//!
//! This is the main entry point for a Lattice node: it joins the cluster
//! mesh over mutual TLS, serves its share of the key space, and forwards
//! the rest to the owning peers.

mod cli;
mod config;
mod node;
mod shutdown;

use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::NodeConfig;
use crate::node::Node;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Set up logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    tracing::info!("Lattice Node v{}", env!("CARGO_PKG_VERSION"));

    // Build configuration
    let config = NodeConfig::from_cli(&cli);

    // Create and run the node
    let node = Node::new(config)?;
    node.run().await?;

    Ok(())
}
