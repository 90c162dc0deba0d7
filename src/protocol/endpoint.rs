//! Endpoint addresses
//!
//! An [`Endpoint`] names a reachable listener by host and port. The host may
//! be an IP literal or a DNS name; resolution happens only when dialing.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// A (host, port) pair identifying a reachable listener
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint, rejecting an empty host or port 0
    ///
    /// # Example
    ///
    /// ```
    /// use p2p_bootstrap::Endpoint;
    ///
    /// let endpoint = Endpoint::new("127.0.0.1", 9000).unwrap();
    /// assert_eq!(endpoint.to_string(), "127.0.0.1:9000");
    /// ```
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ProtocolError> {
        let host = host.into();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .map(str::to_string)
            .unwrap_or(host);

        if host.trim().is_empty() {
            return Err(ProtocolError::InvalidField {
                field: "host",
                reason: "host must not be empty".to_string(),
            });
        }
        if host.chars().any(char::is_whitespace) {
            return Err(ProtocolError::InvalidField {
                field: "host",
                reason: format!("host {:?} contains whitespace", host),
            });
        }
        if port == 0 {
            return Err(ProtocolError::InvalidField {
                field: "port",
                reason: "port must be non-zero".to_string(),
            });
        }

        Ok(Self { host, port })
    }

    /// Endpoint for a concrete socket address
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    /// Host part (IPv6 literals are stored without brackets)
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve to socket addresses
    pub async fn resolve(&self) -> std::io::Result<Vec<SocketAddr>> {
        let addrs = tokio::net::lookup_host((self.host.as_str(), self.port)).await?;
        Ok(addrs.collect())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ProtocolError::InvalidField {
            field: "endpoint",
            reason: format!("{:?}: {}", s, reason),
        };

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, port) = rest
                .split_once("]:")
                .ok_or_else(|| invalid("expected [host]:port"))?;
            (host, port)
        } else {
            let (host, port) = s
                .rsplit_once(':')
                .ok_or_else(|| invalid("expected host:port"))?;
            if host.contains(':') {
                return Err(invalid("IPv6 hosts must be bracketed"));
            }
            (host, port)
        };

        let port = port
            .parse::<u16>()
            .map_err(|e| invalid(&format!("bad port: {}", e)))?;

        Self::new(host, port)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::from_socket_addr(addr)
    }
}
