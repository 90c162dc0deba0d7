//! Single-shot request/response over one connection
//!
//! A [`PeerSession`] carries exactly one exchange: the requester sends one
//! frame and reads one frame back, the responder does the mirror image. Both
//! operations consume the session and close the connection afterwards.

use crate::error::Result;
use crate::network::{Connection, ConnectionRole};
use std::net::SocketAddr;
use tracing::debug;

/// Computes the response to one request
pub trait Responder: Send + Sync + 'static {
    /// Response bytes for `request` received from `peer`
    fn respond(&self, peer: SocketAddr, request: &[u8]) -> Vec<u8>;
}

impl<F> Responder for F
where
    F: Fn(SocketAddr, &[u8]) -> Vec<u8> + Send + Sync + 'static,
{
    fn respond(&self, peer: SocketAddr, request: &[u8]) -> Vec<u8> {
        self(peer, request)
    }
}

/// Answers every request with the request itself
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoResponder;

impl Responder for EchoResponder {
    fn respond(&self, _peer: SocketAddr, request: &[u8]) -> Vec<u8> {
        request.to_vec()
    }
}

/// Which half of the exchange this side performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Sends the request
    Requester,
    /// Answers the request
    Responder,
}

/// Sizes of a completed exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    /// Request payload length
    pub request_len: usize,
    /// Response payload length
    pub response_len: usize,
}

/// One request and one response over a connection
#[derive(Debug)]
pub struct PeerSession {
    connection: Connection,
}

impl PeerSession {
    /// Wrap an established connection
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Dialers request, listeners respond
    pub fn role(&self) -> SessionRole {
        match self.connection.role() {
            ConnectionRole::Dialer => SessionRole::Requester,
            ConnectionRole::Listener => SessionRole::Responder,
        }
    }

    /// Remote address
    pub fn peer_addr(&self) -> SocketAddr {
        self.connection.peer_addr()
    }

    /// Send `payload`, wait for the response, then close
    pub async fn request(mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let outcome = async {
            self.connection.send(payload).await?;
            self.connection.receive().await
        }
        .await;

        self.connection.close().await?;
        let response = outcome?;

        debug!(
            peer = %self.connection.peer_addr(),
            request_len = payload.len(),
            response_len = response.len(),
            "session completed"
        );
        Ok(response)
    }

    /// Wait for one request, answer it with `responder`, then close
    pub async fn respond<R>(mut self, responder: &R) -> Result<Exchange>
    where
        R: Responder + ?Sized,
    {
        let peer = self.connection.peer_addr();
        let outcome = async {
            let request = self.connection.receive().await?;
            let response = responder.respond(peer, &request);
            self.connection.send(&response).await?;
            Ok::<_, crate::error::BootstrapError>(Exchange {
                request_len: request.len(),
                response_len: response.len(),
            })
        }
        .await;

        self.connection.close().await?;
        outcome
    }
}
