//! Configuration types for bootstrap nodes
//!
//! [`NodeConfig`] is what a [`Node`](crate::api::Node) runs with. It is
//! normally assembled by [`NodeBuilder`](crate::api::NodeBuilder), either in
//! code or from a [`NodeConfigFile`](crate::api::NodeConfigFile).

use crate::error::{ConfigError, Result};
use crate::network::TransportConfig;
use crate::protocol::Endpoint;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Default cap on concurrently served connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

/// What a node advertises to every peer that connects
///
/// Every accepted connection starts with an advertisement frame, so a node
/// that knows of no peers still sends one with an empty list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AdvertisePolicy {
    /// Advertise the address the listener is bound to
    ///
    /// An unspecified bind address (`0.0.0.0`, `::`) is advertised as the
    /// loopback address of the same family.
    #[default]
    LocalAddress,
    /// Advertise this list, in order; an empty list tells peers they are alone
    Endpoints(Vec<Endpoint>),
}

impl AdvertisePolicy {
    /// Endpoints to advertise for a listener bound to `local_addr`
    pub fn resolve(&self, local_addr: SocketAddr) -> Vec<Endpoint> {
        match self {
            Self::LocalAddress => {
                let ip = match local_addr.ip() {
                    IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
                    IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
                    ip => ip,
                };
                vec![Endpoint::from_socket_addr(SocketAddr::new(
                    ip,
                    local_addr.port(),
                ))]
            },
            Self::Endpoints(endpoints) => endpoints.clone(),
        }
    }
}

/// Complete node configuration
///
/// Certificate material is not part of it; it is handed to the builder
/// separately so this structure stays cheap to clone and print.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address to listen on; port 0 picks a free port
    pub bind_address: SocketAddr,

    /// Transport security, timeouts and frame limit
    pub transport: TransportConfig,

    /// Advertisement sent to joining peers
    pub advertise: AdvertisePolicy,

    /// Maximum number of connections served at once
    pub max_connections: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            transport: TransportConfig::default(),
            advertise: AdvertisePolicy::default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl NodeConfig {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `max_connections` is 0
    /// - any transport value is out of range
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_connections".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }

        self.transport.validate()
    }
}
