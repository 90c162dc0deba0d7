//! Common test helpers and utilities
//!
//! Shared fixtures for the integration tests: self-signed certificates,
//! transport configurations with short timeouts and loopback listeners.

#![allow(dead_code)]

use p2p_bootstrap::api::Event;
use p2p_bootstrap::network::{generate_self_signed_pem, CertificateMaterial, SecureListener};
use p2p_bootstrap::{Endpoint, Node, NodeBuilder, TransportConfig};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Duration;

/// Bound applied to every wait in the integration tests
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Self-signed certificate valid for localhost and 127.0.0.1
pub fn create_test_certificate() -> CertificateMaterial {
    CertificateMaterial::self_signed(&["localhost", "127.0.0.1"]).unwrap()
}

/// Transport configuration trusting exactly the given certificates
pub fn trusting(certificates: &[&CertificateMaterial]) -> TransportConfig {
    TransportConfig::trusting(
        certificates
            .iter()
            .map(|material| material.leaf().clone())
            .collect(),
    )
    .with_handshake_timeout(Duration::from_secs(2))
    .with_io_timeout(Duration::from_secs(2))
}

/// Bind a TLS listener on an ephemeral loopback port
pub async fn bind_listener(
    material: &CertificateMaterial,
    config: TransportConfig,
) -> SecureListener {
    SecureListener::bind("127.0.0.1:0".parse().unwrap(), material, config)
        .await
        .unwrap()
}

/// Endpoint for a loopback socket address
pub fn endpoint_of(addr: SocketAddr) -> Endpoint {
    Endpoint::from_socket_addr(addr)
}

/// A loopback port nothing is listening on
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Build and start a node from a partially configured builder
pub async fn start_node(builder: NodeBuilder) -> Node {
    let mut node = builder
        .with_bind_address("127.0.0.1:0".parse().unwrap())
        .build()
        .unwrap();
    node.start().await.unwrap();
    node
}

/// Record every event a node dispatches
pub fn record_events(node: &mut Node) -> Arc<Mutex<Vec<Event>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = Arc::clone(&events);
    node.on_event(move |event| events_clone.lock().push(event));
    events
}

/// Write a fresh self-signed certificate and key into `dir`
pub fn write_identity(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    let (cert_pem, key_pem) = generate_self_signed_pem(&["localhost", "127.0.0.1"]).unwrap();
    let cert_path = dir.join(format!("{}.crt", name));
    let key_path = dir.join(format!("{}.key", name));
    std::fs::write(&cert_path, cert_pem).unwrap();
    std::fs::write(&key_path, key_pem).unwrap();
    (cert_path, key_path)
}
