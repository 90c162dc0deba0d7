//! Joining-peer API

use crate::bootstrap::handshake::{ClientHandshake, HandshakeResult};
use crate::error::Result;
use crate::network::TransportConfig;
use crate::protocol::Endpoint;
use crate::session::PeerSession;
use std::time::Duration;
use tracing::info;

/// Default bound on waiting for the advertisement after connecting
pub const DEFAULT_ADVERTISEMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of [`BootstrapClient::join`]
#[derive(Debug)]
pub enum JoinOutcome {
    /// The bootnode advertised no endpoints; this peer is on its own
    Alone,
    /// Connected to an advertised endpoint
    Connected {
        /// Endpoint the session is connected to
        endpoint: Endpoint,
        /// Session ready for one request
        session: PeerSession,
    },
}

impl JoinOutcome {
    /// True for [`JoinOutcome::Alone`]
    pub fn is_alone(&self) -> bool {
        matches!(self, Self::Alone)
    }
}

/// Client for bootstrapping into the overlay through a bootnode
///
/// # Example
///
/// ```no_run
/// use p2p_bootstrap::bootstrap::{BootstrapClient, JoinOutcome};
/// use p2p_bootstrap::network::{CertificateMaterial, TransportConfig};
///
/// # async fn example(bootnode_cert: CertificateMaterial) -> p2p_bootstrap::Result<()> {
/// let client = BootstrapClient::new(TransportConfig::trusting(vec![bootnode_cert.leaf().clone()]));
///
/// match client.join(&"127.0.0.1:8080".parse()?).await? {
///     JoinOutcome::Alone => println!("no peers yet"),
///     JoinOutcome::Connected { session, .. } => {
///         let reply = session.request(b"ping").await?;
///         println!("{}", String::from_utf8_lossy(&reply));
///     },
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BootstrapClient {
    transport: TransportConfig,
    advertisement_timeout: Duration,
}

impl BootstrapClient {
    /// Client using `transport` for every connection it opens
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            advertisement_timeout: DEFAULT_ADVERTISEMENT_TIMEOUT,
        }
    }

    /// Bound the wait for the advertisement frame
    pub fn with_advertisement_timeout(mut self, timeout: Duration) -> Self {
        self.advertisement_timeout = timeout;
        self
    }

    /// Connect to `bootnode` and read its advertisement
    ///
    /// Every failure is reported as `HandshakeFailed` with a status of
    /// timeout, rejected, unreachable, malformed or closed.
    pub async fn discover(&self, bootnode: &Endpoint) -> Result<HandshakeResult> {
        ClientHandshake::new(bootnode.clone(), self.advertisement_timeout)
            .run(&self.transport)
            .await
    }

    /// Discover peers through `bootnode`, then connect to an advertised one
    ///
    /// When the first advertised endpoint is the bootnode itself, by name or
    /// by the address the connection reached, the bootstrap connection is
    /// reused for the session. Otherwise it is closed and the advertised
    /// endpoints are dialed in order.
    pub async fn join(&self, bootnode: &Endpoint) -> Result<JoinOutcome> {
        let mut handshake = ClientHandshake::new(bootnode.clone(), self.advertisement_timeout);
        let (bootnode, endpoints, mut connection) = handshake.run(&self.transport).await?.into_parts();

        if endpoints.is_empty() {
            connection.close().await?;
            info!(bootnode = %bootnode, "bootnode advertised no peers; joined alone");
            return Ok(JoinOutcome::Alone);
        }

        let reached = Endpoint::from_socket_addr(connection.peer_addr());
        if endpoints[0] == bootnode || endpoints[0] == reached {
            info!(bootnode = %bootnode, "bootnode advertised itself; reusing connection");
            return Ok(JoinOutcome::Connected {
                endpoint: endpoints[0].clone(),
                session: PeerSession::new(connection),
            });
        }

        connection.close().await?;

        let (endpoint, connection) = handshake
            .connect_to_advertised(&endpoints, &self.transport)
            .await?;
        info!(bootnode = %bootnode, peer = %endpoint, "connected to advertised peer");

        Ok(JoinOutcome::Connected {
            endpoint,
            session: PeerSession::new(connection),
        })
    }
}
