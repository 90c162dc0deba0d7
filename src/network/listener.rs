//! TLS listener
//!
//! Accepting is split in two steps so that a slow or hostile client can never
//! block the accept loop: [`SecureListener::accept_pending`] only takes the TCP
//! connection, and [`PendingConnection::handshake`] runs the TLS handshake,
//! normally on its own task.

use crate::error::{NetworkError, Result};
use crate::network::connection::{classify_tls_error, timed_out, Connection, ConnectionRole};
use crate::network::tls::{CertificateMaterial, TransportConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::{TlsAcceptor, TlsStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// TLS listener for accepting incoming connections
pub struct SecureListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    config: Arc<TransportConfig>,
    local_addr: SocketAddr,
    closed: CancellationToken,
}

impl SecureListener {
    /// Bind a TLS listener to the specified address
    ///
    /// The certificate material is checked before the socket is bound, so an
    /// unusable certificate never leaves a half-open listener behind.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use p2p_bootstrap::network::{CertificateMaterial, SecureListener, TransportConfig};
    ///
    /// # async fn example() -> p2p_bootstrap::Result<()> {
    /// let material = CertificateMaterial::self_signed(&["localhost"])?;
    /// let listener = SecureListener::bind(
    ///     "127.0.0.1:0".parse().unwrap(),
    ///     &material,
    ///     TransportConfig::default(),
    /// )
    /// .await?;
    ///
    /// let mut conn = listener.accept().await?;
    /// let request = conn.receive().await?;
    /// conn.send(&request).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn bind(
        address: SocketAddr,
        material: &CertificateMaterial,
        config: TransportConfig,
    ) -> Result<Self> {
        config.validate()?;
        let server_config = config.server_config(material)?;

        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| NetworkError::BindFailed {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| NetworkError::BindFailed {
                address: address.to_string(),
                reason: format!("Failed to get local address: {}", e),
            })?;

        info!(
            address = %local_addr,
            fingerprint = %material.fingerprint(),
            client_auth = config.require_client_certificate,
            "TLS listener bound"
        );

        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(server_config),
            config: Arc::new(config),
            local_addr,
            closed: CancellationToken::new(),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept the next TCP connection without running the TLS handshake
    ///
    /// Returns `ListenerClosed` once [`close`](Self::close) has been called,
    /// including when a call is already waiting.
    pub async fn accept_pending(&self) -> Result<PendingConnection> {
        if self.closed.is_cancelled() {
            return Err(NetworkError::ListenerClosed.into());
        }

        let (tcp_stream, peer_addr) = tokio::select! {
            _ = self.closed.cancelled() => return Err(NetworkError::ListenerClosed.into()),
            accepted = self.listener.accept() => accepted.map_err(|e| NetworkError::TransportFailure {
                reason: format!("Failed to accept connection: {}", e),
            })?,
        };

        let _ = tcp_stream.set_nodelay(true);
        debug!(peer = %peer_addr, "accepted TCP connection");

        Ok(PendingConnection {
            tcp_stream,
            peer_addr,
            acceptor: self.acceptor.clone(),
            config: Arc::clone(&self.config),
            shutdown: CancellationToken::new(),
        })
    }

    /// Accept the next connection and complete its TLS handshake
    pub async fn accept(&self) -> Result<Connection> {
        self.accept_pending().await?.handshake().await
    }

    /// Stop accepting; pending and future accepts return `ListenerClosed`
    ///
    /// Connections that were already accepted are not affected.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            info!(address = %self.local_addr, "TLS listener closed");
        }
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Transport settings applied to accepted connections
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl std::fmt::Debug for SecureListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureListener")
            .field("local_addr", &self.local_addr)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// TCP connection accepted by a [`SecureListener`] whose TLS handshake has
/// not run yet
pub struct PendingConnection {
    tcp_stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: TlsAcceptor,
    config: Arc<TransportConfig>,
    shutdown: CancellationToken,
}

impl PendingConnection {
    /// Remote address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Tie the handshake and the resulting connection to a shutdown token
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Run the TLS handshake, bounded by the handshake timeout
    ///
    /// A client that never completes the handshake gets `Timeout`; its socket
    /// is dropped.
    pub async fn handshake(self) -> Result<Connection> {
        let Self {
            tcp_stream,
            peer_addr,
            acceptor,
            config,
            shutdown,
        } = self;
        let bound = config.handshake_timeout;

        let tls_stream = tokio::select! {
            _ = shutdown.cancelled() => return Err(NetworkError::ConnectionClosed.into()),
            accepted = timeout(bound, acceptor.accept(tcp_stream)) => match accepted {
                Err(_) => return Err(timed_out("TLS accept", bound)),
                Ok(Err(e)) => return Err(classify_tls_error(&peer_addr.to_string(), e).into()),
                Ok(Ok(stream)) => stream,
            },
        };

        let connection = Connection::new(
            TlsStream::from(tls_stream),
            ConnectionRole::Listener,
            peer_addr,
            &config,
            shutdown,
        );

        debug!(
            peer = %peer_addr,
            fingerprint = ?connection.peer_fingerprint(),
            "TLS handshake completed"
        );

        Ok(connection)
    }
}

impl std::fmt::Debug for PendingConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingConnection")
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BootstrapError;
    use std::time::Duration;

    async fn bind_local() -> SecureListener {
        let material = CertificateMaterial::self_signed(&["localhost", "127.0.0.1"]).unwrap();
        SecureListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            &material,
            TransportConfig::default().with_handshake_timeout(Duration::from_millis(200)),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let listener = bind_local().await;
        assert_ne!(listener.local_addr().port(), 0);
        assert!(!listener.is_closed());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_failed() {
        let first = bind_local().await;
        let material = CertificateMaterial::self_signed(&["localhost"]).unwrap();

        let result =
            SecureListener::bind(first.local_addr(), &material, TransportConfig::default()).await;

        assert!(matches!(
            result,
            Err(BootstrapError::Network(NetworkError::BindFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_accept() {
        let listener = Arc::new(bind_local().await);

        let waiting = {
            let listener = Arc::clone(&listener);
            tokio::spawn(async move { listener.accept_pending().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        listener.close();

        let result = timeout(Duration::from_secs(5), waiting)
            .await
            .expect("accept did not unblock")
            .unwrap();
        assert!(matches!(
            result,
            Err(BootstrapError::Network(NetworkError::ListenerClosed))
        ));

        assert!(matches!(
            listener.accept().await,
            Err(BootstrapError::Network(NetworkError::ListenerClosed))
        ));
    }

    #[tokio::test]
    async fn test_silent_client_times_out_handshake() {
        let listener = bind_local().await;
        let addr = listener.local_addr();

        // A raw TCP client that never speaks TLS
        let _client = TcpStream::connect(addr).await.unwrap();

        let pending = listener.accept_pending().await.unwrap();
        let result = pending.handshake().await;

        assert!(matches!(
            result,
            Err(BootstrapError::Network(NetworkError::Timeout {
                operation: "TLS accept",
                ..
            }))
        ));
    }
}
