//! Connector Framework configuration types
//!
//! Base trait and common configuration structures.

use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::ConnectorResult;

/// Placeholder written over secrets in redacted configurations.
pub const REDACTED: &str = "***REDACTED***";

/// Trait for connector-specific configuration.
///
/// Each connector implements this trait to define its validation rules and
/// which of its fields are sensitive.
pub trait ConnectorConfig: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Validate the configuration.
    ///
    /// Returns an error if the configuration is invalid.
    fn validate(&self) -> ConnectorResult<()>;

    /// Get credentials held by this configuration.
    ///
    /// Returns a list of (field_name, value) pairs for sensitive data.
    fn get_credentials(&self) -> Vec<(&'static str, String)>;

    /// Create a redacted version of this config (for logging/display).
    fn redacted(&self) -> Self;
}

/// Common connection settings shared across connector types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Connection timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Per-operation response timeout in seconds. Zero disables it.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_operation_timeout() -> u64 {
    120
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_timeout_secs: default_connection_timeout(),
            operation_timeout_secs: default_operation_timeout(),
        }
    }
}

impl ConnectionSettings {
    /// Create new connection settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout.
    pub fn with_connection_timeout(mut self, secs: u64) -> Self {
        self.connection_timeout_secs = secs;
        self
    }

    /// Set the operation timeout.
    pub fn with_operation_timeout(mut self, secs: u64) -> Self {
        self.operation_timeout_secs = secs;
        self
    }

    /// Get connection timeout as Duration.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Get the operation timeout, if one is configured.
    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.operation_timeout_secs > 0).then(|| Duration::from_secs(self.operation_timeout_secs))
    }
}

/// SSL/TLS restrictions applied to secured connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Whether to verify the server certificate.
    #[serde(default = "default_true")]
    pub verify_certificate: bool,

    /// Path to a PEM encoded CA certificate trusted in addition to the system roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_path: Option<String>,

    /// Minimum protocol to negotiate (e.g., "TLSv1.2").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_protocol: Option<String>,

    /// Protocols the client may negotiate (e.g., ["TLSv1.2", "TLSv1.3"]).
    #[serde(default)]
    pub enabled_protocols: Vec<String>,

    /// Cipher suites the client may negotiate.
    #[serde(default)]
    pub enabled_cipher_suites: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            verify_certificate: true,
            ca_cert_path: None,
            ssl_protocol: None,
            enabled_protocols: Vec::new(),
            enabled_cipher_suites: Vec::new(),
        }
    }
}

impl TlsConfig {
    /// Validate the TLS configuration and log security warnings.
    ///
    /// Call after deserializing TLS configuration from external sources.
    pub fn validate_security(&self) {
        if !self.verify_certificate {
            tracing::warn!(
                target: "security",
                "SECURITY WARNING: TLS certificate verification is DISABLED. \
                 This makes the connection vulnerable to Man-in-the-Middle attacks."
            );
        }
    }

    /// Set the CA certificate path.
    pub fn with_ca_cert(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Restrict the protocols the client may negotiate.
    pub fn with_enabled_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }
}
