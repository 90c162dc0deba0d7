//! Network module
//!
//! This module provides the secure transport used by bootnodes and peers:
//! TLS listeners, TLS connections and length-prefixed framing on top of them.

mod connection;
pub mod framing;
mod listener;
mod tls;

pub use connection::{connect, Connection, ConnectionRole, ConnectionState};
pub use listener::{PendingConnection, SecureListener};
pub use tls::{
    certificate_fingerprint, certificates_from_pem, generate_self_signed_pem, CertificateMaterial,
    TlsVersion, TransportConfig,
};

pub(crate) use connection::timed_out;

/// Default maximum frame payload in bytes (1 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// ALPN protocol identifier for the bootstrap transport
pub const BOOTSTRAP_ALPN: &[u8] = b"p2p-bootstrap/1";
