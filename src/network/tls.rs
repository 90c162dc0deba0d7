//! TLS configuration and certificate material
//!
//! This module turns certificate material and a [`TransportConfig`] into
//! rustls client and server configurations. All configurations use the ring
//! crypto provider explicitly, so no process-wide default provider is needed.

use crate::error::{ConfigError, NetworkError, Result};
use crate::network::{BOOTSTRAP_ALPN, DEFAULT_MAX_FRAME_SIZE};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Certificate chain and private key presented by this node
pub struct CertificateMaterial {
    /// Certificate chain, leaf first; never empty
    pub(crate) certificates: Vec<CertificateDer<'static>>,
    /// Private key matching the leaf certificate
    pub(crate) private_key: PrivateKeyDer<'static>,
}

impl Clone for CertificateMaterial {
    fn clone(&self) -> Self {
        Self {
            certificates: self.certificates.clone(),
            private_key: self.private_key.clone_key(),
        }
    }
}

impl std::fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("chain_len", &self.certificates.len())
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

impl CertificateMaterial {
    /// Parse PEM-encoded certificate chain and private key
    ///
    /// The key must be loadable by the crypto provider; a key that is not
    /// fails here with `CertificateInvalid` rather than at bind time.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let certificates = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| NetworkError::CertificateInvalid {
                reason: format!("Failed to parse certificate PEM: {}", e),
            })?;
        if certificates.is_empty() {
            return Err(NetworkError::CertificateInvalid {
                reason: "No certificate found in PEM data".to_string(),
            }
            .into());
        }

        let private_key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| NetworkError::CertificateInvalid {
                reason: format!("Failed to parse private key PEM: {}", e),
            })?
            .ok_or_else(|| NetworkError::CertificateInvalid {
                reason: "No private key found in PEM data".to_string(),
            })?;

        provider()
            .key_provider
            .load_private_key(private_key.clone_key())
            .map_err(|e| NetworkError::CertificateInvalid {
                reason: format!("Unsupported private key: {}", e),
            })?;

        Ok(Self {
            certificates,
            private_key,
        })
    }

    /// Load PEM files supplied by the configuration collaborator
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let cert_pem = read_pem_file(cert_path)?;
        let key_pem = read_pem_file(key_path)?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Generate a self-signed certificate for development and tests
    ///
    /// Every entry of `names` becomes a subject alternative name; entries that
    /// parse as IP addresses become IP SANs.
    pub fn self_signed(names: &[&str]) -> Result<Self> {
        let (cert_pem, key_pem) = generate_self_signed_pem(names)?;
        Self::from_pem(cert_pem.as_bytes(), key_pem.as_bytes())
    }

    /// Certificate chain, leaf first
    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certificates
    }

    /// Leaf certificate, for use as a trust anchor by peers
    pub fn leaf(&self) -> &CertificateDer<'static> {
        &self.certificates[0]
    }

    /// BLAKE3 fingerprint of the leaf certificate, hex-encoded
    pub fn fingerprint(&self) -> String {
        certificate_fingerprint(self.leaf())
    }
}

/// BLAKE3 fingerprint of a DER certificate, hex-encoded
pub fn certificate_fingerprint(cert: &CertificateDer<'_>) -> String {
    hex::encode(blake3::hash(cert.as_ref()).as_bytes())
}

/// Parse every certificate from a PEM bundle
pub fn certificates_from_pem(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            NetworkError::CertificateInvalid {
                reason: format!("Failed to parse certificate PEM: {}", e),
            }
            .into()
        })
}

fn read_pem_file(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    Ok(std::fs::read(path)?)
}

/// Generate a self-signed certificate and key, both PEM-encoded
///
/// Creates a certificate with:
/// - Subject: CN=p2p-bootstrap-node
/// - Validity: 1 year from now
/// - Key: ECDSA P-256
pub fn generate_self_signed_pem(names: &[&str]) -> Result<(String, String)> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "p2p-bootstrap-node");
    params.distinguished_name = dn;

    let now = OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::minutes(5);
    params.not_after = now + time::Duration::days(365);

    params.subject_alt_names = names
        .iter()
        .map(|name| match name.parse::<IpAddr>() {
            Ok(ip) => Ok(SanType::IpAddress(ip)),
            Err(_) => rcgen::Ia5String::try_from(name.to_string())
                .map(SanType::DnsName)
                .map_err(|e| NetworkError::CertificateInvalid {
                    reason: format!("Invalid DNS name {:?}: {}", name, e),
                }),
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let key_pair = KeyPair::generate().map_err(|e| NetworkError::CertificateInvalid {
        reason: format!("Failed to generate key pair: {}", e),
    })?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| NetworkError::CertificateInvalid {
            reason: format!("Failed to generate self-signed certificate: {}", e),
        })?;

    Ok((cert.pem(), key_pair.serialize_pem()))
}

/// Lowest TLS version a node will negotiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TlsVersion {
    /// TLS 1.2 and 1.3
    Tls12,
    /// TLS 1.3 only
    #[default]
    Tls13,
}

static TLS12_AND_LATER: &[&rustls::SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];
static TLS13_ONLY: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];

impl TlsVersion {
    fn protocol_versions(self) -> &'static [&'static rustls::SupportedProtocolVersion] {
        match self {
            Self::Tls12 => TLS12_AND_LATER,
            Self::Tls13 => TLS13_ONLY,
        }
    }
}

/// Transport-level security and timing options
///
/// Defaults are secure: the remote certificate is always verified against
/// `trusted_certificates`, and there is no way to turn that off except
/// [`TransportConfig::insecure_skip_verification_for_testing`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub(crate) verify_peer_certificate: bool,
    /// Trust anchors for verifying remote certificates
    pub trusted_certificates: Vec<CertificateDer<'static>>,
    /// Certificate presented when a listener asks for one
    pub client_certificate: Option<CertificateMaterial>,
    /// Listener side: demand and verify client certificates
    pub require_client_certificate: bool,
    /// Bound on TCP connect plus TLS handshake
    pub handshake_timeout: Duration,
    /// Bound on each frame send or receive
    pub io_timeout: Duration,
    /// Lowest negotiated TLS version
    pub min_protocol_version: TlsVersion,
    /// Largest frame payload sent or accepted
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            verify_peer_certificate: true,
            trusted_certificates: Vec::new(),
            client_certificate: None,
            require_client_certificate: false,
            handshake_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(30),
            min_protocol_version: TlsVersion::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl TransportConfig {
    /// Secure defaults trusting the given anchors
    pub fn trusting(trusted_certificates: Vec<CertificateDer<'static>>) -> Self {
        Self {
            trusted_certificates,
            ..Default::default()
        }
    }

    /// TEST ONLY: accept any remote certificate
    ///
    /// Signatures in the TLS handshake are still checked, but the certificate
    /// itself is not validated against any trust anchor. Every dial made with
    /// this configuration logs a warning.
    pub fn insecure_skip_verification_for_testing() -> Self {
        Self {
            verify_peer_certificate: false,
            ..Default::default()
        }
    }

    /// Whether remote certificates are verified
    pub fn verifies_peer_certificate(&self) -> bool {
        self.verify_peer_certificate
    }

    /// Add a trust anchor
    pub fn with_trusted_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.trusted_certificates.push(cert);
        self
    }

    /// Present this certificate when a listener asks for one
    pub fn with_client_certificate(mut self, material: CertificateMaterial) -> Self {
        self.client_certificate = Some(material);
        self
    }

    /// Set the connect + TLS handshake bound
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the per-frame I/O bound
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Set the frame size limit
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Set the lowest negotiated TLS version
    pub fn with_min_protocol_version(mut self, version: TlsVersion) -> Self {
        self.min_protocol_version = version;
        self
    }

    /// Validate value ranges
    pub fn validate(&self) -> Result<()> {
        if self.handshake_timeout.is_zero() {
            return Err(invalid("handshake_timeout", "must be greater than zero"));
        }
        if self.io_timeout.is_zero() {
            return Err(invalid("io_timeout", "must be greater than zero"));
        }
        if self.max_frame_size == 0 || self.max_frame_size > u32::MAX as usize {
            return Err(invalid(
                "max_frame_size",
                "must be between 1 and 4294967295 bytes",
            ));
        }
        if self.require_client_certificate && self.trusted_certificates.is_empty() {
            return Err(invalid(
                "trusted_certificates",
                "client certificates are required but no trust anchors are configured",
            ));
        }
        Ok(())
    }

    /// Build the rustls configuration used for outgoing connections
    pub fn client_config(&self) -> Result<Arc<ClientConfig>> {
        let provider = provider();
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(self.min_protocol_version.protocol_versions())
            .map_err(|e| NetworkError::CertificateInvalid {
                reason: format!("Unsupported protocol versions: {}", e),
            })?;

        let builder = if self.verify_peer_certificate {
            if self.trusted_certificates.is_empty() {
                return Err(invalid(
                    "trusted_certificates",
                    "certificate verification is enabled but no trust anchors are configured",
                ));
            }
            builder.with_root_certificates(self.root_store()?)
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCertificate::new(
                    &provider,
                )))
        };

        let mut config = match &self.client_certificate {
            Some(material) => builder
                .with_client_auth_cert(
                    material.certificates.clone(),
                    material.private_key.clone_key(),
                )
                .map_err(|e| NetworkError::CertificateInvalid {
                    reason: format!("Client certificate rejected by rustls: {}", e),
                })?,
            None => builder.with_no_client_auth(),
        };

        config.alpn_protocols = vec![BOOTSTRAP_ALPN.to_vec()];

        Ok(Arc::new(config))
    }

    /// Build the rustls configuration used by listeners
    pub fn server_config(&self, material: &CertificateMaterial) -> Result<Arc<ServerConfig>> {
        let provider = provider();
        let builder = ServerConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(self.min_protocol_version.protocol_versions())
            .map_err(|e| NetworkError::CertificateInvalid {
                reason: format!("Unsupported protocol versions: {}", e),
            })?;

        let builder = if self.require_client_certificate {
            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(self.root_store()?), provider)
                    .build()
                    .map_err(|e| NetworkError::CertificateInvalid {
                        reason: format!("Failed to build client verifier: {}", e),
                    })?;
            builder.with_client_cert_verifier(verifier)
        } else {
            builder.with_no_client_auth()
        };

        let mut config = builder
            .with_single_cert(
                material.certificates.clone(),
                material.private_key.clone_key(),
            )
            .map_err(|e| NetworkError::CertificateInvalid {
                reason: format!("Certificate and key rejected by rustls: {}", e),
            })?;

        config.alpn_protocols = vec![BOOTSTRAP_ALPN.to_vec()];

        Ok(Arc::new(config))
    }

    fn root_store(&self) -> Result<RootCertStore> {
        let mut roots = RootCertStore::empty();
        for cert in &self.trusted_certificates {
            roots
                .add(cert.clone())
                .map_err(|e| NetworkError::CertificateInvalid {
                    reason: format!("Unusable trust anchor: {}", e),
                })?;
        }
        Ok(roots)
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::BootstrapError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// TLS server name for a dial target
pub(crate) fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string()).map_err(|e| {
        NetworkError::DialFailed {
            address: host.to_string(),
            reason: format!("Invalid server name: {}", e),
        }
        .into()
    })
}

/// Verifier that skips certificate validation but still checks handshake
/// signatures. Only reachable through
/// [`TransportConfig::insecure_skip_verification_for_testing`].
#[derive(Debug)]
struct AcceptAnyServerCertificate {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AcceptAnyServerCertificate {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for AcceptAnyServerCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
