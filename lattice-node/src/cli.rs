//! Command-line argument parsing.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Lattice clustered key-value store node.
#[derive(Parser, Debug, Clone)]
#[command(name = "lattice-node")]
#[command(about = "Lattice clustered key-value store node")]
#[command(version)]
pub struct Cli {
    /// Cluster listen address.
    #[arg(long, default_value = "0.0.0.0:7400")]
    pub listen: SocketAddr,

    /// Address advertised to peers (defaults to the listen address).
    #[arg(long)]
    pub advertise: Option<SocketAddr>,

    /// Path to the cluster CA certificate (PEM).
    #[arg(long)]
    pub ca: PathBuf,

    /// Path to this node's certificate (PEM).
    #[arg(long)]
    pub cert: PathBuf,

    /// Path to this node's private key (PEM).
    #[arg(long)]
    pub key: PathBuf,

    /// Comma-separated list of seed nodes to join through.
    #[arg(long, value_delimiter = ',')]
    pub seed_nodes: Option<Vec<SocketAddr>>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
