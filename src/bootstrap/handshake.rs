//! Bootnode and client state machines

use crate::error::{BootstrapError, NetworkError, Result};
use crate::network::{connect, timed_out, Connection, TransportConfig};
use crate::protocol::{decode_advertisement, encode_advertisement, Endpoint};
use crate::session::PeerSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Bootnode side of the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootnodeState {
    /// Connection accepted, nothing sent yet
    AwaitingPeer,
    /// Advertisement is being written
    Advertising,
    /// Advertisement was sent, or sending it failed
    Done,
}

/// Sends the advertisement to one freshly accepted peer
///
/// The encoded advertisement is shared between all handshakes of a node, so
/// creating one per connection costs a reference count.
#[derive(Debug)]
pub struct BootnodeHandshake {
    payload: Arc<[u8]>,
    advertised: usize,
    state: BootnodeState,
}

impl BootnodeHandshake {
    /// Handshake advertising `endpoints` in order
    pub fn new(endpoints: &[Endpoint]) -> Self {
        Self::from_encoded(encode_advertisement(endpoints).into(), endpoints.len())
    }

    pub(crate) fn from_encoded(payload: Arc<[u8]>, advertised: usize) -> Self {
        Self {
            payload,
            advertised,
            state: BootnodeState::AwaitingPeer,
        }
    }

    /// Current state
    pub fn state(&self) -> BootnodeState {
        self.state
    }

    /// Send the advertisement frame; returns the number of endpoints sent
    ///
    /// The connection stays open either way so a PeerSession can follow.
    pub async fn run(&mut self, connection: &mut Connection) -> Result<usize> {
        self.state = BootnodeState::Advertising;
        let sent = connection.send(&self.payload).await;
        self.state = BootnodeState::Done;

        sent?;
        debug!(
            peer = %connection.peer_addr(),
            endpoints = self.advertised,
            "advertisement sent"
        );
        Ok(self.advertised)
    }
}

/// Client side of the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Dialing the bootnode
    Connecting,
    /// Connected, waiting for the advertisement frame
    AwaitingAdvertisement,
    /// Advertisement decoded
    Received,
    /// Dialing an advertised endpoint
    ConnectingToAdvertisedPeer,
}

/// Outcome of a successful handshake with a bootnode
#[derive(Debug)]
pub struct HandshakeResult {
    bootnode: Endpoint,
    endpoints: Vec<Endpoint>,
    connection: Connection,
}

impl HandshakeResult {
    /// Bootnode that was contacted
    pub fn bootnode(&self) -> &Endpoint {
        &self.bootnode
    }

    /// Advertised endpoints, in the bootnode's order
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// True when the bootnode knew of no peers
    pub fn is_alone(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Use the still-open connection for a PeerSession with the bootnode
    pub fn into_session(self) -> PeerSession {
        PeerSession::new(self.connection)
    }

    /// Split into bootnode, endpoints and the still-open connection
    pub fn into_parts(self) -> (Endpoint, Vec<Endpoint>, Connection) {
        (self.bootnode, self.endpoints, self.connection)
    }
}

/// Drives one bootstrap attempt against one bootnode
///
/// No retry happens here. A failed attempt surfaces as
/// `HandshakeFailed { status }` and the caller decides what to do next.
#[derive(Debug)]
pub struct ClientHandshake {
    bootnode: Endpoint,
    advertisement_timeout: Duration,
    state: ClientState,
}

impl ClientHandshake {
    /// Handshake against `bootnode`, waiting at most `advertisement_timeout`
    /// for the advertisement once connected
    pub fn new(bootnode: Endpoint, advertisement_timeout: Duration) -> Self {
        Self {
            bootnode,
            advertisement_timeout,
            state: ClientState::Connecting,
        }
    }

    /// Current state
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Connect to the bootnode and read its advertisement
    pub async fn run(&mut self, transport: &TransportConfig) -> Result<HandshakeResult> {
        self.state = ClientState::Connecting;
        let mut connection = connect(&self.bootnode, transport)
            .await
            .map_err(|e| self.failed(e))?;

        self.state = ClientState::AwaitingAdvertisement;
        match self.read_advertisement(&mut connection).await {
            Ok(endpoints) => {
                self.state = ClientState::Received;
                debug!(
                    bootnode = %self.bootnode,
                    endpoints = endpoints.len(),
                    "advertisement received"
                );
                Ok(HandshakeResult {
                    bootnode: self.bootnode.clone(),
                    endpoints,
                    connection,
                })
            },
            Err(e) => {
                let _ = connection.close().await;
                Err(self.failed(e))
            },
        }
    }

    /// Dial the advertised endpoints in order and return the first connection
    /// that succeeds, or the last failure
    ///
    /// Every node opens a connection with its own advertisement, so that frame
    /// is read and discarded before the connection is handed back.
    pub async fn connect_to_advertised(
        &mut self,
        endpoints: &[Endpoint],
        transport: &TransportConfig,
    ) -> Result<(Endpoint, Connection)> {
        self.state = ClientState::ConnectingToAdvertisedPeer;

        let mut last_error = None;
        for endpoint in endpoints {
            match self.open_peer_connection(endpoint, transport).await {
                Ok(connection) => return Ok((endpoint.clone(), connection)),
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "advertised endpoint unreachable");
                    last_error = Some(e);
                },
            }
        }

        Err(match last_error {
            Some(e) => e,
            None => NetworkError::DialFailed {
                address: self.bootnode.to_string(),
                reason: "bootnode advertised no endpoints".to_string(),
            }
            .into(),
        })
    }

    async fn open_peer_connection(
        &self,
        endpoint: &Endpoint,
        transport: &TransportConfig,
    ) -> Result<Connection> {
        let mut connection = connect(endpoint, transport).await?;
        match self.read_advertisement(&mut connection).await {
            Ok(known) => {
                debug!(peer = %endpoint, endpoints = known.len(), "skipped peer advertisement");
                Ok(connection)
            },
            Err(e) => {
                let _ = connection.close().await;
                Err(e)
            },
        }
    }

    async fn read_advertisement(&self, connection: &mut Connection) -> Result<Vec<Endpoint>> {
        let frame = timeout(self.advertisement_timeout, connection.receive())
            .await
            .map_err(|_| timed_out("advertisement", self.advertisement_timeout))??;

        Ok(decode_advertisement(&frame)?)
    }

    fn failed(&self, err: BootstrapError) -> BootstrapError {
        let status = err.handshake_status();
        warn!(bootnode = %self.bootnode, status = %status, error = %err, "bootstrap handshake failed");

        NetworkError::HandshakeFailed {
            bootnode: self.bootnode.to_string(),
            status,
            reason: err.to_string(),
        }
        .into()
    }
}
