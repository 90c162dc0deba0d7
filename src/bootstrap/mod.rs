//! Bootstrap handshake
//!
//! Right after a connection is established the bootnode sends exactly one
//! frame holding an [`Advertisement`](crate::protocol::Advertisement). The
//! joining peer reads it and, if it names any endpoint, opens a follow-up
//! connection for a [`PeerSession`](crate::session::PeerSession).
//!
//! There is no challenge or negotiation at this layer. Authentication is
//! whatever the TLS transport already established.

mod client;
mod handshake;

pub use client::{BootstrapClient, JoinOutcome, DEFAULT_ADVERTISEMENT_TIMEOUT};
pub use handshake::{
    BootnodeHandshake, BootnodeState, ClientHandshake, ClientState, HandshakeResult,
};
