//! # p2p-bootstrap
//!
//! Secure bootstrap transport for a small peer-to-peer overlay.
//!
//! A well-known bootnode accepts TLS connections and sends every joining peer
//! a framed advertisement listing reachable endpoints. The peer then connects
//! to one of them and runs a single request/response PeerSession.
//!
//! ## Quick Start
//!
//! ```no_run
//! use p2p_bootstrap::bootstrap::{BootstrapClient, JoinOutcome};
//! use p2p_bootstrap::network::{CertificateMaterial, TransportConfig};
//! use p2p_bootstrap::session::EchoResponder;
//! use p2p_bootstrap::NodeBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let certificate = CertificateMaterial::self_signed(&["127.0.0.1"])?;
//!     let trust = TransportConfig::trusting(vec![certificate.leaf().clone()]);
//!
//!     let mut bootnode = NodeBuilder::new()
//!         .with_certificate(certificate)
//!         .with_responder(EchoResponder)
//!         .build()?;
//!     bootnode.start().await?;
//!
//!     let client = BootstrapClient::new(trust);
//!     let bootnode_endpoint = bootnode.endpoint().ok_or("node is not running")?;
//!     if let JoinOutcome::Connected { session, .. } = client.join(&bootnode_endpoint).await? {
//!         assert_eq!(session.request(b"ping").await?, b"ping");
//!     }
//!
//!     bootnode.stop().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod api;
pub mod bootstrap;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;

// Re-export main types
pub use api::{Event, Node, NodeBuilder, NodeConfig, NodeConfigFile, NodeState};
pub use bootstrap::{BootstrapClient, HandshakeResult, JoinOutcome};
pub use error::{BootstrapError, ConfigError, HandshakeStatus, NetworkError, ProtocolError, Result};
pub use network::{connect, CertificateMaterial, Connection, SecureListener, TransportConfig};
pub use protocol::Endpoint;
pub use session::{EchoResponder, PeerSession, Responder};
