//! Authenticated, encrypted connections
//!
//! A [`Connection`] is a TLS stream over TCP with frame-level `send` and
//! `receive`. It is owned by exactly one task. Every I/O call is bounded by
//! the configured I/O timeout and gives up as soon as the connection's
//! shutdown token is cancelled.

use crate::error::{NetworkError, Result};
use crate::network::framing::{read_frame, write_frame, FRAME_HEADER_LEN};
use crate::network::tls::{self, certificate_fingerprint, TransportConfig};
use crate::protocol::Endpoint;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::{TlsConnector, TlsStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// State of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is active and can send/receive
    Connected,
    /// Connection is in the process of closing
    Closing,
    /// Connection is closed
    Closed,
    /// An I/O error, timeout or malformed frame left the stream unusable
    Failed,
}

/// Which side opened the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// We dialed the peer
    Dialer,
    /// The peer dialed our listener
    Listener,
}

/// A TLS connection to a peer
pub struct Connection {
    stream: TlsStream<TcpStream>,
    role: ConnectionRole,
    peer_addr: SocketAddr,
    peer_fingerprint: Option<String>,
    state: ConnectionState,
    created_at: Instant,
    bytes_sent: u64,
    bytes_received: u64,
    max_frame_size: usize,
    io_timeout: Duration,
    shutdown: CancellationToken,
}

impl Connection {
    pub(crate) fn new(
        stream: TlsStream<TcpStream>,
        role: ConnectionRole,
        peer_addr: SocketAddr,
        config: &TransportConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let peer_certificates = match &stream {
            TlsStream::Client(s) => s.get_ref().1.peer_certificates(),
            TlsStream::Server(s) => s.get_ref().1.peer_certificates(),
        };
        let peer_fingerprint = peer_certificates
            .and_then(|certs| certs.first())
            .map(certificate_fingerprint);

        Self {
            stream,
            role,
            peer_addr,
            peer_fingerprint,
            state: ConnectionState::Connected,
            created_at: Instant::now(),
            bytes_sent: 0,
            bytes_received: 0,
            max_frame_size: config.max_frame_size,
            io_timeout: config.io_timeout,
            shutdown,
        }
    }

    /// Send one frame
    ///
    /// Payloads over the frame limit are rejected before anything is written
    /// and leave the connection usable. Any other failure leaves it `Failed`.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.ensure_usable()?;

        if payload.len() > self.max_frame_size {
            return Err(NetworkError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            }
            .into());
        }

        let shutdown = self.shutdown.clone();
        let io_timeout = self.io_timeout;
        let max_frame_size = self.max_frame_size;

        let outcome = tokio::select! {
            _ = shutdown.cancelled() => Err(NetworkError::ConnectionClosed.into()),
            written = timeout(io_timeout, write_frame(&mut self.stream, payload, max_frame_size)) => {
                written.unwrap_or_else(|_| Err(timed_out("send", io_timeout)))
            },
        };

        match outcome {
            Ok(()) => {
                self.bytes_sent += (payload.len() + FRAME_HEADER_LEN) as u64;
                Ok(())
            },
            Err(e) => {
                self.state = ConnectionState::Failed;
                Err(e)
            },
        }
    }

    /// Receive one frame, waiting at most the configured I/O timeout
    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        self.ensure_usable()?;

        let shutdown = self.shutdown.clone();
        let io_timeout = self.io_timeout;
        let max_frame_size = self.max_frame_size;

        let outcome = tokio::select! {
            _ = shutdown.cancelled() => Err(NetworkError::ConnectionClosed.into()),
            read = timeout(io_timeout, read_frame(&mut self.stream, max_frame_size)) => {
                read.unwrap_or_else(|_| Err(timed_out("receive", io_timeout)))
            },
        };

        match outcome {
            Ok(payload) => {
                self.bytes_received += (payload.len() + FRAME_HEADER_LEN) as u64;
                Ok(payload)
            },
            Err(e) => {
                self.state = ConnectionState::Failed;
                Err(e)
            },
        }
    }

    /// Close the connection gracefully
    ///
    /// Sends a TLS close_notify when the stream still allows it and releases
    /// the socket. Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }

        self.state = ConnectionState::Closing;

        // Errors during shutdown are ignored; the socket is released either way
        if let Ok(Err(e)) = timeout(self.io_timeout, self.stream.shutdown()).await {
            debug!(peer = %self.peer_addr, error = %e, "TLS shutdown failed");
        }

        self.state = ConnectionState::Closed;
        self.shutdown.cancel();

        debug!(
            peer = %self.peer_addr,
            bytes_sent = self.bytes_sent,
            bytes_received = self.bytes_received,
            age = ?self.age(),
            "connection closed"
        );

        Ok(())
    }

    /// Token that, once cancelled, makes pending and future I/O fail with
    /// `ConnectionClosed`
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Get the connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Which side opened the connection
    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    /// Get the peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// BLAKE3 fingerprint of the certificate the peer presented, if any
    pub fn peer_fingerprint(&self) -> Option<&str> {
        self.peer_fingerprint.as_deref()
    }

    /// Get total bytes sent, framing included
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Get total bytes received, framing included
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Get connection age
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.state != ConnectionState::Connected || self.shutdown.is_cancelled() {
            return Err(NetworkError::ConnectionClosed.into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state)
            .field("peer_fingerprint", &self.peer_fingerprint)
            .finish_non_exhaustive()
    }
}

/// Connect to a remote endpoint
///
/// Resolves the host, dials TCP and performs the TLS handshake, all within
/// `config.handshake_timeout`. If the bound elapses the half-open socket is
/// dropped and `Timeout` is returned.
///
/// # Example
///
/// ```no_run
/// use p2p_bootstrap::network::{connect, CertificateMaterial, TransportConfig};
/// use p2p_bootstrap::Endpoint;
///
/// # async fn example(bootnode_cert: CertificateMaterial) -> p2p_bootstrap::Result<()> {
/// let config = TransportConfig::trusting(vec![bootnode_cert.leaf().clone()]);
/// let endpoint: Endpoint = "127.0.0.1:8080".parse()?;
///
/// let mut conn = connect(&endpoint, &config).await?;
/// conn.send(b"hello").await?;
/// conn.close().await?;
/// # Ok(())
/// # }
/// ```
pub async fn connect(remote: &Endpoint, config: &TransportConfig) -> Result<Connection> {
    config.validate()?;

    if !config.verifies_peer_certificate() {
        warn!(
            remote = %remote,
            "Certificate verification is disabled; this configuration is for tests only"
        );
    }

    let tls_config = config.client_config()?;
    let server_name = tls::server_name(remote.host())?;
    let bound = config.handshake_timeout;

    let (stream, peer_addr) = timeout(bound, async {
        let tcp_stream = dial_tcp(remote).await?;
        let peer_addr = tcp_stream
            .peer_addr()
            .map_err(|e| NetworkError::DialFailed {
                address: remote.to_string(),
                reason: format!("Failed to get peer address: {}", e),
            })?;

        let connector = TlsConnector::from(tls_config);
        let tls_stream = connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| classify_tls_error(&remote.to_string(), e))?;

        Ok::<_, crate::error::BootstrapError>((tls_stream, peer_addr))
    })
    .await
    .map_err(|_| timed_out("connect", bound))??;

    let connection = Connection::new(
        TlsStream::from(stream),
        ConnectionRole::Dialer,
        peer_addr,
        config,
        CancellationToken::new(),
    );

    debug!(
        peer = %peer_addr,
        fingerprint = ?connection.peer_fingerprint(),
        "TLS connection established"
    );

    Ok(connection)
}

async fn dial_tcp(remote: &Endpoint) -> Result<TcpStream> {
    let addrs = remote.resolve().await.map_err(|e| NetworkError::DialFailed {
        address: remote.to_string(),
        reason: format!("Name resolution failed: {}", e),
    })?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            },
            Err(e) => {
                debug!(address = %addr, error = %e, "TCP connect attempt failed");
                last_error = Some(e);
            },
        }
    }

    Err(NetworkError::DialFailed {
        address: remote.to_string(),
        reason: match last_error {
            Some(e) => format!("TCP connection failed: {}", e),
            None => "Name resolved to no addresses".to_string(),
        },
    }
    .into())
}

/// Map a TLS handshake I/O error to the network taxonomy
///
/// tokio-rustls wraps `rustls::Error` inside the `io::Error`; certificate
/// verification failures become `CertificateRejected`.
pub(crate) fn classify_tls_error(address: &str, err: std::io::Error) -> NetworkError {
    match err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    {
        Some(rustls::Error::InvalidCertificate(reason)) => NetworkError::CertificateRejected {
            address: address.to_string(),
            reason: format!("{:?}", reason),
        },
        Some(rustls::Error::NoCertificatesPresented) => NetworkError::CertificateRejected {
            address: address.to_string(),
            reason: "no certificate presented".to_string(),
        },
        Some(other) => NetworkError::TlsHandshakeFailed {
            reason: other.to_string(),
        },
        None => NetworkError::TlsHandshakeFailed {
            reason: err.to_string(),
        },
    }
}

pub(crate) fn timed_out(operation: &'static str, bound: Duration) -> crate::error::BootstrapError {
    NetworkError::Timeout {
        operation,
        millis: bound.as_millis() as u64,
    }
    .into()
}
