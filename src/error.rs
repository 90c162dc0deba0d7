//! Error types for the bootstrap transport
//!
//! Errors are grouped by layer. [`NetworkError`] covers the secure transport
//! and framing, [`ProtocolError`] covers the advertisement wire record and
//! [`ConfigError`] covers everything the configuration collaborator supplies.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for bootstrap operations
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Transport, TLS or framing failure
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Wire record could not be encoded or decoded
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors outside of an established connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, BootstrapError>;

/// Network-level errors
#[derive(Error, Debug)]
pub enum NetworkError {
    /// The listener could not bind its socket
    #[error("Failed to bind {address}: {reason}")]
    BindFailed {
        /// Address the bind was attempted on
        address: String,
        /// Underlying cause
        reason: String,
    },

    /// The remote could not be reached at the TCP level
    #[error("Failed to dial {address}: {reason}")]
    DialFailed {
        /// Remote address
        address: String,
        /// Underlying cause
        reason: String,
    },

    /// Local certificate material is unusable
    #[error("Invalid certificate material: {reason}")]
    CertificateInvalid {
        /// What is wrong with it
        reason: String,
    },

    /// The remote presented a certificate that failed verification
    #[error("Certificate presented by {address} was rejected: {reason}")]
    CertificateRejected {
        /// Remote address
        address: String,
        /// Verification failure
        reason: String,
    },

    /// A bounded operation did not complete in time
    #[error("{operation} timed out after {millis} ms")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
        /// Configured bound in milliseconds
        millis: u64,
    },

    /// The TLS handshake failed for a reason other than certificate rejection
    #[error("TLS handshake failed: {reason}")]
    TlsHandshakeFailed {
        /// Underlying cause
        reason: String,
    },

    /// Mid-session I/O failure
    #[error("Transport failure: {reason}")]
    TransportFailure {
        /// Underlying cause
        reason: String,
    },

    /// Outgoing payload exceeds the frame limit; nothing was written
    #[error("Payload of {size} bytes exceeds the {max} byte frame limit")]
    PayloadTooLarge {
        /// Payload size
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Incoming frame header announces more than the frame limit
    #[error("Frame of {size} bytes exceeds the {max} byte frame limit")]
    FrameTooLarge {
        /// Announced size
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Frame could not be read as a whole
    #[error("Malformed frame: {reason}")]
    Malformed {
        /// What was wrong
        reason: String,
    },

    /// The connection is closed or was left unusable by an earlier failure
    #[error("Connection closed")]
    ConnectionClosed,

    /// The listener was closed
    #[error("Listener closed")]
    ListenerClosed,

    /// Bootstrap handshake failed
    #[error("Bootstrap handshake with {bootnode} failed ({status}): {reason}")]
    HandshakeFailed {
        /// Bootnode that was contacted
        bootnode: String,
        /// Failure classification
        status: HandshakeStatus,
        /// Underlying cause
        reason: String,
    },
}

/// Classification of a failed bootstrap handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// The advertisement (or the transport handshake) did not arrive in time
    Timeout,
    /// The bootnode's certificate or TLS parameters were refused
    Rejected,
    /// The bootnode could not be reached
    Unreachable,
    /// The advertisement frame or record did not parse
    Malformed,
    /// The bootnode closed the connection before advertising
    Closed,
}

impl std::fmt::Display for HandshakeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
            Self::Unreachable => "unreachable",
            Self::Malformed => "malformed",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Wire record errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Failed to decode bytes into a record
    #[error("Failed to decode {record}: {reason}")]
    DecodeFailed {
        /// Record being decoded
        record: &'static str,
        /// Decoder message
        reason: String,
    },

    /// Unsupported protocol version
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    /// A decoded field holds an invalid value
    #[error("Invalid {field}: {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Why it is invalid
        reason: String,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required value is missing
    #[error("Missing required field: {field}")]
    MissingRequiredField {
        /// Field name
        field: String,
    },

    /// A value is present but unusable
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Why it is invalid
        reason: String,
    },

    /// A referenced file does not exist
    #[error("File not found: {path}")]
    FileNotFound {
        /// Path that was looked up
        path: PathBuf,
    },

    /// A configuration file could not be parsed or written
    #[error("Failed to (de)serialize configuration: {reason}")]
    SerializationFailed {
        /// Serializer message
        reason: String,
    },
}

impl BootstrapError {
    /// True when the failure was a timeout at any layer
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Network(NetworkError::Timeout { .. })
                | Self::Network(NetworkError::HandshakeFailed {
                    status: HandshakeStatus::Timeout,
                    ..
                })
        )
    }

    /// True when the failure concerns a single connection and leaves the
    /// listener and every other peer unaffected
    pub fn is_connection_local(&self) -> bool {
        match self {
            Self::Network(err) => !matches!(
                err,
                NetworkError::BindFailed { .. }
                    | NetworkError::ListenerClosed
                    | NetworkError::CertificateInvalid { .. }
            ),
            Self::Protocol(_) => true,
            Self::Config(_) | Self::Io(_) => false,
        }
    }

    /// Handshake status this error maps to when it ends a bootstrap attempt
    pub fn handshake_status(&self) -> HandshakeStatus {
        match self {
            Self::Network(err) => match err {
                NetworkError::Timeout { .. } => HandshakeStatus::Timeout,
                NetworkError::CertificateRejected { .. } | NetworkError::TlsHandshakeFailed { .. } => {
                    HandshakeStatus::Rejected
                },
                NetworkError::DialFailed { .. } => HandshakeStatus::Unreachable,
                NetworkError::Malformed { .. } | NetworkError::FrameTooLarge { .. } => {
                    HandshakeStatus::Malformed
                },
                NetworkError::HandshakeFailed { status, .. } => *status,
                _ => HandshakeStatus::Closed,
            },
            Self::Protocol(_) => HandshakeStatus::Malformed,
            Self::Config(_) => HandshakeStatus::Rejected,
            Self::Io(_) => HandshakeStatus::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_detection() {
        let direct: BootstrapError = NetworkError::Timeout {
            operation: "receive",
            millis: 100,
        }
        .into();
        assert!(direct.is_timeout());

        let wrapped: BootstrapError = NetworkError::HandshakeFailed {
            bootnode: "127.0.0.1:8080".to_string(),
            status: HandshakeStatus::Timeout,
            reason: "no advertisement".to_string(),
        }
        .into();
        assert!(wrapped.is_timeout());

        let closed: BootstrapError = NetworkError::ConnectionClosed.into();
        assert!(!closed.is_timeout());
    }

    #[test]
    fn test_connection_local_classification() {
        let bind: BootstrapError = NetworkError::BindFailed {
            address: "127.0.0.1:1".to_string(),
            reason: "in use".to_string(),
        }
        .into();
        assert!(!bind.is_connection_local());

        let frame: BootstrapError = NetworkError::FrameTooLarge { size: 10, max: 1 }.into();
        assert!(frame.is_connection_local());

        let decode: BootstrapError = ProtocolError::UnsupportedVersion(9).into();
        assert!(decode.is_connection_local());
    }

    #[test]
    fn test_handshake_status_mapping() {
        let rejected: BootstrapError = NetworkError::CertificateRejected {
            address: "x".to_string(),
            reason: "UnknownIssuer".to_string(),
        }
        .into();
        assert_eq!(rejected.handshake_status(), HandshakeStatus::Rejected);

        let dial: BootstrapError = NetworkError::DialFailed {
            address: "x".to_string(),
            reason: "refused".to_string(),
        }
        .into();
        assert_eq!(dial.handshake_status(), HandshakeStatus::Unreachable);

        let malformed: BootstrapError = ProtocolError::UnsupportedVersion(2).into();
        assert_eq!(malformed.handshake_status(), HandshakeStatus::Malformed);

        let closed: BootstrapError = NetworkError::ConnectionClosed.into();
        assert_eq!(closed.handshake_status(), HandshakeStatus::Closed);
    }

    #[test]
    fn test_error_messages() {
        let err = NetworkError::PayloadTooLarge { size: 5, max: 4 };
        assert_eq!(
            err.to_string(),
            "Payload of 5 bytes exceeds the 4 byte frame limit"
        );
        assert_eq!(HandshakeStatus::Unreachable.to_string(), "unreachable");
    }
}
