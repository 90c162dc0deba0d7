//! JSON configuration file
//!
//! This is the configuration collaborator: it supplies the bind address,
//! certificate material, trust anchors, bootnodes and timeouts. The core never
//! reads a path or an address that did not come from here or from code.
//!
//! Relative paths in a loaded file are resolved against the file's directory.

use crate::api::config::{AdvertisePolicy, NodeConfig, DEFAULT_MAX_CONNECTIONS};
use crate::bootstrap::DEFAULT_ADVERTISEMENT_TIMEOUT;
use crate::error::{ConfigError, Result};
use crate::network::{
    certificates_from_pem, CertificateMaterial, TlsVersion, TransportConfig,
    DEFAULT_MAX_FRAME_SIZE,
};
use crate::protocol::Endpoint;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// On-disk node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfigFile {
    /// Address to listen on
    pub bind_address: SocketAddr,

    /// PEM certificate chain presented by this node
    pub certificate_path: PathBuf,

    /// PEM private key matching the certificate
    pub private_key_path: PathBuf,

    /// PEM bundles holding trust anchors for remote certificates
    #[serde(default)]
    pub trusted_certificate_paths: Vec<PathBuf>,

    /// Endpoints to advertise; absent means the node's own address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise: Option<Vec<Endpoint>>,

    /// Bootnodes a joining peer contacts, in order
    #[serde(default)]
    pub bootnodes: Vec<Endpoint>,

    /// Bound on TCP connect plus TLS handshake
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Bound on each frame send or receive
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Bound on waiting for a bootnode's advertisement
    #[serde(default = "default_advertisement_timeout_ms")]
    pub advertisement_timeout_ms: u64,

    /// Largest frame payload sent or accepted
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Lowest TLS version negotiated
    #[serde(default)]
    pub min_protocol_version: TlsVersion,

    /// Demand client certificates signed by a trusted anchor
    #[serde(default)]
    pub require_client_certificate: bool,

    /// Maximum number of connections served at once
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_io_timeout_ms() -> u64 {
    30_000
}

fn default_advertisement_timeout_ms() -> u64 {
    DEFAULT_ADVERTISEMENT_TIMEOUT.as_millis() as u64
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

impl NodeConfigFile {
    /// Configuration with defaults for everything but the required fields
    pub fn new(
        bind_address: SocketAddr,
        certificate_path: impl Into<PathBuf>,
        private_key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bind_address,
            certificate_path: certificate_path.into(),
            private_key_path: private_key_path.into(),
            trusted_certificate_paths: Vec::new(),
            advertise: None,
            bootnodes: Vec::new(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            advertisement_timeout_ms: default_advertisement_timeout_ms(),
            max_frame_size: default_max_frame_size(),
            min_protocol_version: TlsVersion::default(),
            require_client_certificate: false,
            max_connections: default_max_connections(),
        }
    }

    /// Add a trust anchor file
    pub fn with_trusted_certificate(mut self, path: impl Into<PathBuf>) -> Self {
        self.trusted_certificate_paths.push(path.into());
        self
    }

    /// Advertise exactly these endpoints
    pub fn with_advertised(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.advertise = Some(endpoints);
        self
    }

    /// Add a bootnode
    pub fn with_bootnode(mut self, bootnode: Endpoint) -> Self {
        self.bootnodes.push(bootnode);
        self
    }

    /// Validate value ranges without touching the filesystem
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, bool, &str); 6] = [
            (
                "handshake_timeout_ms",
                self.handshake_timeout_ms == 0,
                "must be greater than zero",
            ),
            (
                "io_timeout_ms",
                self.io_timeout_ms == 0,
                "must be greater than zero",
            ),
            (
                "advertisement_timeout_ms",
                self.advertisement_timeout_ms == 0,
                "must be greater than zero",
            ),
            (
                "max_frame_size",
                self.max_frame_size == 0 || self.max_frame_size > u32::MAX as usize,
                "must be between 1 and 4294967295 bytes",
            ),
            (
                "max_connections",
                self.max_connections == 0,
                "must be greater than zero",
            ),
            (
                "trusted_certificate_paths",
                self.require_client_certificate && self.trusted_certificate_paths.is_empty(),
                "client certificates are required but no trust anchors are configured",
            ),
        ];

        for (field, failed, reason) in checks {
            if failed {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: reason.to_string(),
                }
                .into());
            }
        }

        if self.certificate_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequiredField {
                field: "certificate_path".to_string(),
            }
            .into());
        }
        if self.private_key_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequiredField {
                field: "private_key_path".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Load this node's certificate chain and key
    pub fn certificate_material(&self) -> Result<CertificateMaterial> {
        CertificateMaterial::from_pem_files(&self.certificate_path, &self.private_key_path)
    }

    /// Build the transport configuration, loading every trust anchor file
    ///
    /// `material` is presented as the client certificate whenever a listener
    /// asks for one.
    pub fn transport_config(&self, material: &CertificateMaterial) -> Result<TransportConfig> {
        let mut trusted_certificates = Vec::new();
        for path in &self.trusted_certificate_paths {
            if !path.exists() {
                return Err(ConfigError::FileNotFound { path: path.clone() }.into());
            }
            trusted_certificates.extend(certificates_from_pem(&std::fs::read(path)?)?);
        }

        let config = TransportConfig {
            trusted_certificates,
            client_certificate: Some(material.clone()),
            require_client_certificate: self.require_client_certificate,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            io_timeout: Duration::from_millis(self.io_timeout_ms),
            min_protocol_version: self.min_protocol_version,
            max_frame_size: self.max_frame_size,
            ..Default::default()
        };
        config.validate()?;

        Ok(config)
    }

    /// Advertisement policy described by the `advertise` field
    pub fn advertise_policy(&self) -> AdvertisePolicy {
        match &self.advertise {
            None => AdvertisePolicy::LocalAddress,
            Some(endpoints) => AdvertisePolicy::Endpoints(endpoints.clone()),
        }
    }

    /// Bound on waiting for a bootnode's advertisement
    pub fn advertisement_timeout(&self) -> Duration {
        Duration::from_millis(self.advertisement_timeout_ms)
    }

    /// Node configuration, loading certificate files as needed
    pub fn node_config(&self, material: &CertificateMaterial) -> Result<NodeConfig> {
        let config = NodeConfig {
            bind_address: self.bind_address,
            transport: self.transport_config(material)?,
            advertise: self.advertise_policy(),
            max_connections: self.max_connections,
        };
        config.validate()?;
        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        let rebase = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };

        rebase(&mut self.certificate_path);
        rebase(&mut self.private_key_path);
        self.trusted_certificate_paths.iter_mut().for_each(rebase);
    }
}

/// Save configuration to a JSON file
///
/// # Example
///
/// ```no_run
/// use p2p_bootstrap::api::{save_config, NodeConfigFile};
/// use std::path::Path;
///
/// let config = NodeConfigFile::new("127.0.0.1:8080".parse().unwrap(), "node.crt", "node.key");
/// save_config(Path::new("bootnode.json"), &config).unwrap();
/// ```
pub fn save_config(path: &Path, config: &NodeConfigFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(|e| ConfigError::SerializationFailed {
        reason: format!("Failed to serialize config: {}", e),
    })?;

    std::fs::write(path, json)?;

    Ok(())
}

/// Load and validate configuration from a JSON file
///
/// # Errors
///
/// Returns an error if:
/// - The file doesn't exist
/// - The file contains invalid JSON or doesn't match the schema
/// - A value is out of range
pub fn load_config(path: &Path) -> Result<NodeConfigFile> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }

    let json = std::fs::read_to_string(path)?;

    let mut config: NodeConfigFile =
        serde_json::from_str(&json).map_err(|e| ConfigError::SerializationFailed {
            reason: format!("Failed to deserialize config: {}", e),
        })?;

    if let Some(base) = path.parent() {
        config.rebase(base);
    }

    config.validate()?;

    Ok(config)
}

/// Check if a configuration file exists
pub fn config_exists(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BootstrapError;
    use crate::network::generate_self_signed_pem;
    use tempfile::TempDir;

    fn write_identity(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
        let (cert_pem, key_pem) = generate_self_signed_pem(&["localhost", "127.0.0.1"]).unwrap();
        let cert_path = dir.join(format!("{}.crt", name));
        let key_path = dir.join(format!("{}.key", name));
        std::fs::write(&cert_path, cert_pem).unwrap();
        std::fs::write(&key_path, key_pem).unwrap();
        (cert_path, key_path)
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("bootnode.json");

        let original = NodeConfigFile::new(
            "127.0.0.1:8080".parse().unwrap(),
            temp_dir.path().join("node.crt"),
            temp_dir.path().join("node.key"),
        )
        .with_advertised(vec!["127.0.0.1:9000".parse().unwrap()])
        .with_bootnode("10.0.0.1:8080".parse().unwrap());

        save_config(&config_path, &original).unwrap();
        assert!(config_exists(&config_path));

        let loaded = load_config(&config_path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bootnode.json");
        std::fs::write(
            &config_path,
            r#"{
                "bind_address": "127.0.0.1:8080",
                "certificate_path": "certs/node.crt",
                "private_key_path": "certs/node.key"
            }"#,
        )
        .unwrap();

        let loaded = load_config(&config_path).unwrap();

        assert_eq!(loaded.handshake_timeout_ms, 10_000);
        assert_eq!(loaded.io_timeout_ms, 30_000);
        assert_eq!(loaded.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(loaded.min_protocol_version, TlsVersion::Tls13);
        assert_eq!(loaded.advertise_policy(), AdvertisePolicy::LocalAddress);
        assert!(loaded.bootnodes.is_empty());

        // Relative paths are resolved next to the config file
        assert_eq!(
            loaded.certificate_path,
            temp_dir.path().join("certs/node.crt")
        );
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config(Path::new("/nonexistent/bootnode.json"));
        assert!(matches!(
            result,
            Err(BootstrapError::Config(ConfigError::FileNotFound { .. }))
        ));
    }

    #[test]
    fn test_load_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bootnode.json");
        std::fs::write(&config_path, "{ not json").unwrap();

        assert!(matches!(
            load_config(&config_path),
            Err(BootstrapError::Config(ConfigError::SerializationFailed { .. }))
        ));
    }

    #[test]
    fn test_load_rejects_bad_endpoint() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bootnode.json");
        std::fs::write(
            &config_path,
            r#"{
                "bind_address": "127.0.0.1:8080",
                "certificate_path": "node.crt",
                "private_key_path": "node.key",
                "advertise": ["127.0.0.1:0"]
            }"#,
        )
        .unwrap();

        assert!(load_config(&config_path).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config =
            NodeConfigFile::new("127.0.0.1:8080".parse().unwrap(), "node.crt", "node.key");
        config.io_timeout_ms = 0;

        assert!(matches!(
            config.validate(),
            Err(BootstrapError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_node_config_from_files() {
        let temp_dir = TempDir::new().unwrap();
        let (cert_path, key_path) = write_identity(temp_dir.path(), "node");
        let (peer_cert, _) = write_identity(temp_dir.path(), "peer");

        let mut file = NodeConfigFile::new("127.0.0.1:0".parse().unwrap(), cert_path, key_path)
            .with_trusted_certificate(peer_cert);
        file.handshake_timeout_ms = 1_500;
        file.advertise = Some(vec![]);

        let material = file.certificate_material().unwrap();
        let config = file.node_config(&material).unwrap();

        assert_eq!(config.transport.trusted_certificates.len(), 1);
        assert_eq!(config.transport.handshake_timeout, Duration::from_millis(1_500));
        assert!(config.transport.verifies_peer_certificate());
        assert!(config.transport.client_certificate.is_some());
        assert_eq!(config.advertise, AdvertisePolicy::Endpoints(vec![]));
    }

    #[test]
    fn test_missing_trust_anchor_file() {
        let temp_dir = TempDir::new().unwrap();
        let (cert_path, key_path) = write_identity(temp_dir.path(), "node");

        let file = NodeConfigFile::new("127.0.0.1:0".parse().unwrap(), cert_path, key_path)
            .with_trusted_certificate(temp_dir.path().join("missing.crt"));
        let material = file.certificate_material().unwrap();

        assert!(matches!(
            file.transport_config(&material),
            Err(BootstrapError::Config(ConfigError::FileNotFound { .. }))
        ));
    }
}
