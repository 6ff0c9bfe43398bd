//! Mutually authenticated TLS transport for cluster links.
//!
//! Every node holds a certificate signed by the cluster CA. Outbound
//! connections verify the server against the CA and present the node's own
//! certificate; inbound connections require and verify a client
//! certificate against the same CA. A link on which either side fails to
//! present a certificate is rejected.

use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsStream;

use crate::error::{ClusterError, ClusterResult};

/// Paths to the node's TLS certificate material (PEM format).
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// Path to this node's certificate.
    pub cert_path: PathBuf,
    /// Path to this node's private key.
    pub key_path: PathBuf,
    /// Path to the cluster CA certificate.
    pub ca_path: PathBuf,
}

impl TlsSettings {
    /// Create settings from the three PEM paths.
    pub fn new(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        ca_path: impl AsRef<Path>,
    ) -> Self {
        Self {
            cert_path: cert_path.as_ref().to_path_buf(),
            key_path: key_path.as_ref().to_path_buf(),
            ca_path: ca_path.as_ref().to_path_buf(),
        }
    }
}

/// Shared TLS state: one connector for dialing, one acceptor for inbound.
#[derive(Clone)]
pub struct TlsContext {
    connector: tokio_rustls::TlsConnector,
    acceptor: tokio_rustls::TlsAcceptor,
}

fn read_pem_certs(pem: &[u8], what: &str) -> ClusterResult<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(pem);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .filter_map(|r| r.ok())
        .collect();

    if certs.is_empty() {
        return Err(ClusterError::Tls(format!("no certificates in {}", what)));
    }
    Ok(certs)
}

fn read_pem_key(pem: &[u8]) -> ClusterResult<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(pem);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ClusterError::Tls(format!("failed to parse private key: {}", e)))?
        .ok_or_else(|| ClusterError::Tls("no private key found".into()))
}

fn read_file(path: &Path) -> ClusterResult<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| ClusterError::Tls(format!("{}: {}", path.display(), e)))
}

impl TlsContext {
    /// Build a context by loading the PEM files named in `settings`.
    pub fn from_settings(settings: &TlsSettings) -> ClusterResult<Self> {
        let cert_pem = read_file(&settings.cert_path)?;
        let key_pem = read_file(&settings.key_path)?;
        let ca_pem = read_file(&settings.ca_path)?;
        Self::from_pem(&cert_pem, &key_pem, &ca_pem)
    }

    /// Build a context from in-memory PEM material.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8], ca_pem: &[u8]) -> ClusterResult<Self> {
        let certs = read_pem_certs(cert_pem, "node certificate")?;
        let ca_certs = read_pem_certs(ca_pem, "CA certificate")?;

        let mut roots = RootCertStore::empty();
        for cert in ca_certs {
            roots
                .add(cert)
                .map_err(|e| ClusterError::Tls(format!("failed to add CA certificate: {}", e)))?;
        }
        let roots = Arc::new(roots);

        let client_verifier = WebPkiClientVerifier::builder(roots.clone())
            .build()
            .map_err(|e| ClusterError::Tls(format!("client verifier: {}", e)))?;

        let server_config = rustls::ServerConfig::builder()
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(certs.clone(), read_pem_key(key_pem)?)
            .map_err(|e| ClusterError::Tls(format!("server config: {}", e)))?;

        let client_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots.clone())
            .with_client_auth_cert(certs, read_pem_key(key_pem)?)
            .map_err(|e| ClusterError::Tls(format!("client config: {}", e)))?;

        Ok(Self {
            connector: tokio_rustls::TlsConnector::from(Arc::new(client_config)),
            acceptor: tokio_rustls::TlsAcceptor::from(Arc::new(server_config)),
        })
    }

    /// Dial `addr` and complete the TLS handshake as a client.
    ///
    /// Fails with [`ClusterError::ConnectTimeout`] if the dial exceeds
    /// `connect_timeout` and [`ClusterError::NoPeerCertificate`] if the
    /// server completed the handshake without a certificate.
    pub async fn connect(
        &self,
        addr: SocketAddr,
        connect_timeout: Duration,
    ) -> ClusterResult<TlsStream<TcpStream>> {
        let tcp = match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ClusterError::ConnectFailed {
                    addr,
                    reason: e.to_string(),
                });
            }
            Err(_) => return Err(ClusterError::ConnectTimeout { addr }),
        };

        if let Err(e) = tcp.set_nodelay(true) {
            tracing::warn!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let server_name = ServerName::try_from(addr.ip().to_string())
            .map_err(|e| ClusterError::Tls(format!("invalid server name: {}", e)))?;

        let stream = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| ClusterError::HandshakeFailed(e.to_string()))?;

        let stream = TlsStream::from(stream);
        verify_peer_certificate(&stream)?;

        Ok(stream)
    }

    /// Complete the TLS handshake on an accepted TCP connection.
    pub async fn accept(&self, tcp: TcpStream) -> ClusterResult<TlsStream<TcpStream>> {
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::warn!(error = %e, "Failed to set TCP_NODELAY");
        }

        let stream = self
            .acceptor
            .accept(tcp)
            .await
            .map_err(|e| ClusterError::HandshakeFailed(e.to_string()))?;

        let stream = TlsStream::from(stream);
        verify_peer_certificate(&stream)?;

        Ok(stream)
    }
}

/// Reject links whose remote end presented no certificate.
fn verify_peer_certificate(stream: &TlsStream<TcpStream>) -> ClusterResult<()> {
    let (_, session) = stream.get_ref();
    match session.peer_certificates() {
        Some(certs) if !certs.is_empty() => Ok(()),
        _ => Err(ClusterError::NoPeerCertificate),
    }
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_paths() {
        let settings = TlsSettings::new("node.pem", "node.key", "ca.pem");
        assert_eq!(settings.cert_path, PathBuf::from("node.pem"));
        assert_eq!(settings.key_path, PathBuf::from("node.key"));
        assert_eq!(settings.ca_path, PathBuf::from("ca.pem"));
    }

    #[test]
    fn test_from_pem_rejects_garbage() {
        let result = TlsContext::from_pem(b"not pem", b"not pem", b"not pem");
        assert!(matches!(result, Err(ClusterError::Tls(_))));
    }

    #[test]
    fn test_from_settings_missing_file() {
        let settings = TlsSettings::new(
            "/nonexistent/cert.pem",
            "/nonexistent/key.pem",
            "/nonexistent/ca.pem",
        );
        let result = TlsContext::from_settings(&settings);
        assert!(matches!(result, Err(ClusterError::Tls(_))));
    }

    #[test]
    fn test_from_settings_loads_pem_files() {
        let (cert, key, ca) = crate::testutil::pem_material();

        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("node.pem");
        let key_path = dir.path().join("node.key");
        let ca_path = dir.path().join("ca.pem");
        std::fs::write(&cert_path, cert).unwrap();
        std::fs::write(&key_path, key).unwrap();
        std::fs::write(&ca_path, ca).unwrap();

        let settings = TlsSettings::new(&cert_path, &key_path, &ca_path);
        assert!(TlsContext::from_settings(&settings).is_ok());
    }
}
