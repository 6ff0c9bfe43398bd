//! Acceptance tests for the cluster layer.
//!
//! These run real nodes over mutually authenticated TLS on loopback and
//! verify the acceptance criteria:
//! 1. Two nodes connect and exchange membership
//! 2. Gossip converges a three-node cluster into a full mesh
//! 3. Key-value operations are served across the cluster
//! 4. Missing keys are reported as not found
//! 5. A node never connects to its own address
//! 6. Shutting a node down removes it from its peers' registries

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lattice_cluster::{ClusterConfig, ClusterNode, NodeHandle, TlsContext};
use lattice_ring::HashRing;
use lattice_store::KvStore;

/// Certificate material shared by all nodes of a test cluster.
struct TlsMaterial {
    ca_pem: String,
    cert_pem: String,
    key_pem: String,
}

impl TlsMaterial {
    /// Issue a CA and a loopback node certificate signed by it.
    fn new() -> Self {
        let mut ca_params = rcgen::CertificateParams::new(vec![]);
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let ca = rcgen::Certificate::from_params(ca_params).unwrap();

        let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()]);
        params
            .subject_alt_names
            .push(rcgen::SanType::IpAddress("127.0.0.1".parse().unwrap()));
        let cert = rcgen::Certificate::from_params(params).unwrap();

        Self {
            ca_pem: ca.serialize_pem().unwrap(),
            cert_pem: cert.serialize_pem_with_signer(&ca).unwrap(),
            key_pem: cert.serialize_private_key_pem(),
        }
    }

    fn context(&self) -> TlsContext {
        TlsContext::from_pem(
            self.cert_pem.as_bytes(),
            self.key_pem.as_bytes(),
            self.ca_pem.as_bytes(),
        )
        .unwrap()
    }
}

/// Reserve a loopback address with a free port.
fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Start a node and wait for its listener to come up.
async fn spawn_node(material: &TlsMaterial, bootstrap: Vec<SocketAddr>) -> (NodeHandle, SocketAddr) {
    let addr = free_addr();
    let config = ClusterConfig::new(addr)
        .with_bootstrap_peers(bootstrap)
        .with_connect_timeout(Duration::from_secs(2));

    let mut node = ClusterNode::with_tls_context(
        config,
        material.context(),
        Arc::new(KvStore::new()),
        Arc::new(HashRing::new()),
    );
    let bound_rx = node.bound_addr_receiver();
    let handle = node.handle();

    tokio::spawn(async move {
        node.run().await.unwrap();
    });

    let bound = bound_rx.await.unwrap();
    (handle, bound)
}

/// Poll until `cond` holds, panicking after ten seconds.
async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn two_nodes_exchange_membership() {
    let material = TlsMaterial::new();

    let (node_a, addr_a) = spawn_node(&material, vec![]).await;
    let (node_b, addr_b) = spawn_node(&material, vec![addr_a]).await;

    wait_for("a sees b", || node_a.peer_count() == 1).await;
    wait_for("b sees a", || node_b.peer_count() == 1).await;

    assert!(node_a.is_connected_to(&addr_b));
    assert!(node_b.is_connected_to(&addr_a));
    assert_ne!(node_a.node_id(), node_b.node_id());
}

#[tokio::test]
async fn gossip_converges_to_full_mesh() {
    let material = TlsMaterial::new();

    // B and C only know A; they must learn each other through gossip.
    let (node_a, addr_a) = spawn_node(&material, vec![]).await;
    let (node_b, addr_b) = spawn_node(&material, vec![addr_a]).await;
    let (node_c, addr_c) = spawn_node(&material, vec![addr_a]).await;

    wait_for("full mesh", || {
        node_a.peer_count() == 2 && node_b.peer_count() == 2 && node_c.peer_count() == 2
    })
    .await;

    assert!(node_b.is_connected_to(&addr_c));
    assert!(node_c.is_connected_to(&addr_b));

    // Gossip keeps flowing after convergence without duplicating links.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(node_a.peer_count(), 2);
    assert_eq!(node_b.peer_count(), 2);
    assert_eq!(node_c.peer_count(), 2);
}

#[tokio::test]
async fn kv_operations_served_across_cluster() {
    let material = TlsMaterial::new();

    let (node_a, addr_a) = spawn_node(&material, vec![]).await;
    let (node_b, _addr_b) = spawn_node(&material, vec![addr_a]).await;

    wait_for("membership", || {
        node_a.peer_count() == 1 && node_b.peer_count() == 1
    })
    .await;

    // Writes through A are readable through B regardless of which node
    // owns each key.
    for i in 0..32 {
        let key = format!("key-{}", i);
        let value = format!("value-{}", i).into_bytes();
        node_a.set(&key, value, i, 0).await.unwrap();
    }

    for i in 0..32 {
        let key = format!("key-{}", i);
        let expected = format!("value-{}", i).into_bytes();
        let got = node_b.get(&key).await.unwrap();
        assert_eq!(got, Some((expected, i)));
    }

    // Deletes observed cluster-wide.
    assert!(node_b.delete("key-0").await.unwrap());
    assert!(!node_a.delete("key-0").await.unwrap());
    assert_eq!(node_a.get("key-0").await.unwrap(), None);
}

#[tokio::test]
async fn missing_keys_report_not_found() {
    let material = TlsMaterial::new();

    let (node_a, addr_a) = spawn_node(&material, vec![]).await;
    let (node_b, _addr_b) = spawn_node(&material, vec![addr_a]).await;

    wait_for("membership", || {
        node_a.peer_count() == 1 && node_b.peer_count() == 1
    })
    .await;

    assert_eq!(node_a.get("missing").await.unwrap(), None);
    assert_eq!(node_b.get("missing").await.unwrap(), None);
    assert!(!node_a.delete("missing").await.unwrap());
    assert!(!node_b.delete("missing").await.unwrap());
}

#[tokio::test]
async fn node_never_connects_to_itself() {
    let material = TlsMaterial::new();

    // Bootstrapping a node with its own address must be a no-op.
    let addr = free_addr();
    let config = ClusterConfig::new(addr)
        .with_bootstrap_peers(vec![addr])
        .with_connect_timeout(Duration::from_secs(2));

    let mut node = ClusterNode::with_tls_context(
        config,
        material.context(),
        Arc::new(KvStore::new()),
        Arc::new(HashRing::new()),
    );
    let bound_rx = node.bound_addr_receiver();
    let handle = node.handle();
    tokio::spawn(async move {
        node.run().await.unwrap();
    });
    bound_rx.await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(handle.peer_count(), 0);
}

#[tokio::test]
async fn plaintext_client_never_becomes_a_peer() {
    let material = TlsMaterial::new();
    let (node_a, addr_a) = spawn_node(&material, vec![]).await;

    // A client that skips TLS entirely must be rejected during the
    // handshake and never reach the registry.
    use tokio::io::AsyncWriteExt;
    let mut stream = tokio::net::TcpStream::connect(addr_a).await.unwrap();
    let _ = stream.write_all(b"definitely not a tls client hello").await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(node_a.peer_count(), 0);
}

#[tokio::test]
async fn shutdown_removes_peer_from_registry() {
    let material = TlsMaterial::new();

    let (node_a, addr_a) = spawn_node(&material, vec![]).await;
    let (node_b, addr_b) = spawn_node(&material, vec![addr_a]).await;

    wait_for("membership", || {
        node_a.peer_count() == 1 && node_b.peer_count() == 1
    })
    .await;

    node_b.shutdown().await;

    wait_for("b removed from a", || node_a.peer_count() == 0).await;
    assert!(!node_a.is_connected_to(&addr_b));
}
