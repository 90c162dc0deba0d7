//! Protocol module
//!
//! The bootstrap advertisement is the only structured record on the wire.
//! It is a Protocol Buffers message carried as the payload of a single frame:
//!
//! ```text
//! message EndpointRecord { string host = 1; uint32 port = 2; }
//! message Advertisement  { uint32 version = 1; repeated EndpointRecord endpoints = 2; }
//! ```
//!
//! Both sides must agree on this encoding; there is no negotiation.
//! PeerSession payloads are opaque bytes and are not described here.

mod endpoint;

pub use endpoint::Endpoint;

use crate::error::ProtocolError;
use prost::Message;

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Wire form of an [`Endpoint`]
#[derive(Clone, PartialEq, Message)]
pub struct EndpointRecord {
    /// Host name or IP literal
    #[prost(string, tag = "1")]
    pub host: String,
    /// Port; must fit in 16 bits
    #[prost(uint32, tag = "2")]
    pub port: u32,
}

/// Bootnode advertisement: an ordered, possibly empty list of endpoints
#[derive(Clone, PartialEq, Message)]
pub struct Advertisement {
    /// Protocol version of the sender
    #[prost(uint32, tag = "1")]
    pub version: u32,
    /// Advertised endpoints, in preference order
    #[prost(message, repeated, tag = "2")]
    pub endpoints: Vec<EndpointRecord>,
}

impl From<&Endpoint> for EndpointRecord {
    fn from(endpoint: &Endpoint) -> Self {
        Self {
            host: endpoint.host().to_string(),
            port: u32::from(endpoint.port()),
        }
    }
}

impl TryFrom<&EndpointRecord> for Endpoint {
    type Error = ProtocolError;

    fn try_from(record: &EndpointRecord) -> Result<Self, Self::Error> {
        let port = u16::try_from(record.port).map_err(|_| ProtocolError::InvalidField {
            field: "port",
            reason: format!("{} does not fit in 16 bits", record.port),
        })?;
        Endpoint::new(record.host.clone(), port)
    }
}

impl Advertisement {
    /// Advertisement for the given endpoints at the current protocol version
    pub fn new(endpoints: &[Endpoint]) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            endpoints: endpoints.iter().map(EndpointRecord::from).collect(),
        }
    }

    /// Validate the version and every record, returning the endpoints in order
    pub fn into_endpoints(self) -> Result<Vec<Endpoint>, ProtocolError> {
        if self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }
        self.endpoints.iter().map(Endpoint::try_from).collect()
    }
}

/// Encode an advertisement payload
///
/// # Example
///
/// ```
/// use p2p_bootstrap::protocol::{decode_advertisement, encode_advertisement};
/// use p2p_bootstrap::Endpoint;
///
/// let endpoints = vec![Endpoint::new("127.0.0.1", 9000).unwrap()];
/// let bytes = encode_advertisement(&endpoints);
/// assert_eq!(decode_advertisement(&bytes).unwrap(), endpoints);
/// ```
pub fn encode_advertisement(endpoints: &[Endpoint]) -> Vec<u8> {
    Advertisement::new(endpoints).encode_to_vec()
}

/// Decode and validate an advertisement payload
pub fn decode_advertisement(bytes: &[u8]) -> Result<Vec<Endpoint>, ProtocolError> {
    let advertisement = Advertisement::decode(bytes).map_err(|e| ProtocolError::DecodeFailed {
        record: "Advertisement",
        reason: e.to_string(),
    })?;
    advertisement.into_endpoints()
}
