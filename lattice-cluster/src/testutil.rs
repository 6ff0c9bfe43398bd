//! Shared fixtures for unit tests.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc;

use lattice_ring::{HashRing, NodeDescriptor};
use lattice_store::KvStore;

use crate::config::ClusterConfig;
use crate::node::ClusterContext;
use crate::peer::{Peer, PeerEvent};
use crate::registry::PeerRegistry;
use crate::tls::TlsContext;

struct TestCerts {
    cert_pem: String,
    key_pem: String,
    ca_pem: String,
}

/// Issue one CA plus a node certificate, shared by all tests in the run.
fn certs() -> &'static TestCerts {
    static CERTS: OnceLock<TestCerts> = OnceLock::new();
    CERTS.get_or_init(|| {
        let mut ca_params = rcgen::CertificateParams::new(vec![]);
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let ca = rcgen::Certificate::from_params(ca_params).unwrap();

        let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()]);
        params
            .subject_alt_names
            .push(rcgen::SanType::IpAddress("127.0.0.1".parse().unwrap()));
        let cert = rcgen::Certificate::from_params(params).unwrap();

        TestCerts {
            ca_pem: ca.serialize_pem().unwrap(),
            cert_pem: cert.serialize_pem_with_signer(&ca).unwrap(),
            key_pem: cert.serialize_private_key_pem(),
        }
    })
}

/// A TLS context trusting the shared test CA.
pub(crate) fn tls_context() -> TlsContext {
    let (cert, key, ca) = pem_material();
    TlsContext::from_pem(cert.as_bytes(), key.as_bytes(), ca.as_bytes()).unwrap()
}

/// The shared (certificate, key, CA) PEM material.
pub(crate) fn pem_material() -> (&'static str, &'static str, &'static str) {
    let c = certs();
    (&c.cert_pem, &c.key_pem, &c.ca_pem)
}

/// A config bound to an ephemeral local port.
pub(crate) fn config() -> ClusterConfig {
    ClusterConfig::new("127.0.0.1:0".parse().unwrap())
        .with_advertise_addr("127.0.0.1:7499".parse().unwrap())
}

/// A cluster context with fresh collaborators and the event receiver.
pub(crate) fn context() -> (Arc<ClusterContext>, mpsc::Receiver<PeerEvent>) {
    context_with_config(config())
}

/// As [`context`], with explicit configuration.
pub(crate) fn context_with_config(
    config: ClusterConfig,
) -> (Arc<ClusterContext>, mpsc::Receiver<PeerEvent>) {
    let (events, events_rx) = mpsc::channel(256);
    let config = Arc::new(config);
    let local = NodeDescriptor::new(config.node_id, config.advertised());

    let ctx = Arc::new(ClusterContext {
        config,
        tls: tls_context(),
        local,
        store: Arc::new(KvStore::new()),
        ring: Arc::new(HashRing::new()),
        registry: Arc::new(PeerRegistry::new()),
        events,
    });

    (ctx, events_rx)
}

/// An outbound peer that has not been connected.
pub(crate) fn outbound_peer(ctx: &Arc<ClusterContext>, addr: SocketAddr) -> Peer {
    Peer::outbound(ctx.clone(), addr)
}
