//! LDAP connection manager configuration
//!
//! Configuration types for the default server, additional configured servers,
//! and the knobs consumed by the search strategies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use xavyo_connector::config::{ConnectionSettings, ConnectorConfig, TlsConfig, REDACTED};
use xavyo_connector::error::{ConnectorError, ConnectorResult};
use xavyo_connector::resilience::RetryConfig;

use crate::dn::Dn;

/// How the transport secures a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConnectionSecurity {
    /// Plain LDAP.
    #[default]
    None,
    /// LDAP over TLS (`ldaps://`).
    Ssl,
    /// Plain connection upgraded with the StartTLS extended operation.
    StartTls,
}

impl ConnectionSecurity {
    /// Port used when none is configured.
    pub fn default_port(self) -> u16 {
        match self {
            ConnectionSecurity::Ssl => 636,
            ConnectionSecurity::None | ConnectionSecurity::StartTls => 389,
        }
    }

    /// URL scheme for this security mode.
    pub fn scheme(self) -> &'static str {
        match self {
            ConnectionSecurity::Ssl => "ldaps",
            ConnectionSecurity::None | ConnectionSecurity::StartTls => "ldap",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ConnectionSecurity::None => "none",
            ConnectionSecurity::Ssl => "ssl",
            ConnectionSecurity::StartTls => "starttls",
        }
    }
}

impl FromStr for ConnectionSecurity {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(ConnectionSecurity::None),
            "ssl" => Ok(ConnectionSecurity::Ssl),
            "starttls" => Ok(ConnectionSecurity::StartTls),
            other => Err(ConnectorError::invalid_configuration(format!(
                "Unknown value for connection_security: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for ConnectionSecurity {
    type Error = ConnectorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConnectionSecurity> for String {
    fn from(value: ConnectionSecurity) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ConnectionSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a search does when a server answers with a referral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStrategy {
    /// Treat the referral as a fatal error.
    Throw,
    /// Connect to the referred server and continue there.
    #[default]
    Follow,
    /// Stop the search without error.
    Ignore,
}

/// Configuration for the LDAP connection manager.
///
/// The top-level connection fields describe the default server. Entries in
/// `servers` describe additional configured servers; any field they leave
/// unset is inherited from the top level.
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// LDAP server hostname or IP address.
    pub host: String,

    /// LDAP server port. Defaults to 389, or 636 for SSL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Connection security: "none", "ssl" or "starttls".
    #[serde(default)]
    pub connection_security: ConnectionSecurity,

    /// Naming context the default server is authoritative for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_context: Option<String>,

    /// Bind DN for authentication. Empty means anonymous bind.
    #[serde(default)]
    pub bind_dn: String,

    /// Bind password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// Connection settings (connect and operation timeouts).
    #[serde(default)]
    pub connection: ConnectionSettings,

    /// TLS restrictions for secured connections.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Additional configured servers, in declaration order.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// Referral handling for searches.
    #[serde(default)]
    pub referral_strategy: ReferralStrategy,

    /// Accept a size-limit truncation as a partial result instead of an error.
    #[serde(default)]
    pub allow_partial_results: bool,

    /// Server-side size limit for searches. Zero means no limit.
    #[serde(default)]
    pub size_limit: i32,

    /// Server-side time limit for searches, in seconds. Zero means no limit.
    #[serde(default)]
    pub time_limit: i32,

    /// Additional attributes to always treat as binary.
    #[serde(default)]
    pub binary_attributes: Vec<String>,

    /// Pacing and bound for search retries.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connection_security", &self.connection_security)
            .field("base_context", &self.base_context)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &self.bind_password.as_ref().map(|_| REDACTED))
            .field("connection", &self.connection)
            .field("tls", &self.tls)
            .field("servers", &self.servers)
            .field("referral_strategy", &self.referral_strategy)
            .field("allow_partial_results", &self.allow_partial_results)
            .field("size_limit", &self.size_limit)
            .field("time_limit", &self.time_limit)
            .field("binary_attributes", &self.binary_attributes)
            .field("retry", &self.retry)
            .finish()
    }
}

impl LdapConfig {
    /// Create a new LDAP config for a default server.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            connection_security: ConnectionSecurity::None,
            base_context: None,
            bind_dn: String::new(),
            bind_password: None,
            connection: ConnectionSettings::default(),
            tls: TlsConfig::default(),
            servers: Vec::new(),
            referral_strategy: ReferralStrategy::default(),
            allow_partial_results: false,
            size_limit: 0,
            time_limit: 0,
            binary_attributes: Vec::new(),
            retry: RetryConfig::default(),
        }
    }

    /// Set the naming context of the default server.
    pub fn with_base_context(mut self, base_context: impl Into<String>) -> Self {
        self.base_context = Some(base_context.into());
        self
    }

    /// Set bind credentials.
    pub fn with_credentials(
        mut self,
        bind_dn: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.bind_dn = bind_dn.into();
        self.bind_password = Some(password.into());
        self
    }

    /// Enable SSL (LDAPS).
    #[must_use]
    pub fn with_ssl(mut self) -> Self {
        self.connection_security = ConnectionSecurity::Ssl;
        self
    }

    /// Enable STARTTLS.
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.connection_security = ConnectionSecurity::StartTls;
        self
    }

    /// Set an explicit port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Append an additional configured server.
    #[must_use]
    pub fn with_server(mut self, server: ServerConfig) -> Self {
        self.servers.push(server);
        self
    }

    /// Set the referral strategy.
    #[must_use]
    pub fn with_referral_strategy(mut self, strategy: ReferralStrategy) -> Self {
        self.referral_strategy = strategy;
        self
    }

    /// Allow size-limited searches to end with partial results.
    #[must_use]
    pub fn with_allow_partial_results(mut self, allow: bool) -> Self {
        self.allow_partial_results = allow;
        self
    }

    /// Set the server-side size limit.
    #[must_use]
    pub fn with_size_limit(mut self, size_limit: i32) -> Self {
        self.size_limit = size_limit;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Port of the default server, taking the security mode into account.
    pub fn effective_port(&self) -> u16 {
        self.port
            .unwrap_or_else(|| self.connection_security.default_port())
    }

    /// Get the LDAP URL of the default server.
    #[must_use]
    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.connection_security.scheme(),
            self.host,
            self.effective_port()
        )
    }

    /// SSRF protection: validate that a host does not target internal/private services.
    fn validate_host_not_internal(host: &str) -> ConnectorResult<()> {
        use std::net::IpAddr;

        if let Ok(ip) = host.parse::<IpAddr>() {
            let blocked = match ip {
                IpAddr::V4(v4) => {
                    v4.is_loopback()
                        || v4.is_link_local()
                        || v4.is_broadcast()
                        || v4.is_unspecified()
                        || v4 == std::net::Ipv4Addr::new(169, 254, 169, 254)
                }
                IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
            };
            if blocked {
                return Err(ConnectorError::InvalidConfiguration {
                    message: format!("SSRF protection: internal IP not allowed: {host}"),
                });
            }
        } else {
            let lower = host.to_lowercase();
            let blocked_hosts = ["localhost", "metadata.google.internal", "metadata.goog"];
            for b in blocked_hosts {
                if lower == b || lower.ends_with(&format!(".{b}")) {
                    return Err(ConnectorError::InvalidConfiguration {
                        message: format!("SSRF protection: blocked hostname: {host}"),
                    });
                }
            }
        }

        Ok(())
    }

    fn validate_dn(field: &str, value: &str) -> ConnectorResult<()> {
        Dn::parse(value).map(|_| ()).map_err(|e| {
            ConnectorError::invalid_configuration(format!("{field} is not a valid DN: {e}"))
        })
    }
}

impl ConnectorConfig for LdapConfig {
    fn validate(&self) -> ConnectorResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConnectorError::InvalidConfiguration {
                message: "host is required".to_string(),
            });
        }

        // SSRF protection: reject internal hosts (skipped in test builds).
        #[cfg(not(test))]
        Self::validate_host_not_internal(&self.host)?;

        if !self.bind_dn.is_empty() {
            Self::validate_dn("bind_dn", &self.bind_dn)?;
        }
        if let Some(base) = &self.base_context {
            Self::validate_dn("base_context", base)?;
        }

        for (index, server) in self.servers.iter().enumerate() {
            if server.host.trim().is_empty() {
                return Err(ConnectorError::invalid_configuration(format!(
                    "servers[{index}].host is required"
                )));
            }
            #[cfg(not(test))]
            Self::validate_host_not_internal(&server.host)?;

            if let Some(base) = &server.base_context {
                Self::validate_dn("servers[].base_context", base)?;
            }
            if let Some(bind_dn) = server.bind_dn.as_deref().filter(|dn| !dn.is_empty()) {
                Self::validate_dn("servers[].bind_dn", bind_dn)?;
            }
        }

        self.tls.validate_security();
        Ok(())
    }

    fn get_credentials(&self) -> Vec<(&'static str, String)> {
        let mut credentials = Vec::new();
        if let Some(password) = &self.bind_password {
            credentials.push(("bind_password", password.clone()));
        }
        for server in &self.servers {
            if let Some(password) = &server.bind_password {
                credentials.push(("servers.bind_password", password.clone()));
            }
        }
        credentials
    }

    fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.bind_password.is_some() {
            config.bind_password = Some(REDACTED.to_string());
        }
        for server in &mut config.servers {
            if server.bind_password.is_some() {
                server.bind_password = Some(REDACTED.to_string());
            }
        }
        config
    }
}

/// An additional configured server.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server hostname or IP address.
    pub host: String,

    /// Port. Defaults to 389, or 636 for SSL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Connection security. Inherited when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_security: Option<ConnectionSecurity>,

    /// Naming context. Unset means the server is an unscoped fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_context: Option<String>,

    /// Bind DN. Inherited when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_dn: Option<String>,

    /// Bind password. Inherited when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// Connect timeout in seconds. Inherited when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connection_security", &self.connection_security)
            .field("base_context", &self.base_context)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &self.bind_password.as_ref().map(|_| REDACTED))
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl ServerConfig {
    /// Create a server entry for `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Set the naming context.
    pub fn with_base_context(mut self, base_context: impl Into<String>) -> Self {
        self.base_context = Some(base_context.into());
        self
    }

    /// Set an explicit port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Override the connection security.
    #[must_use]
    pub fn with_security(mut self, security: ConnectionSecurity) -> Self {
        self.connection_security = Some(security);
        self
    }

    /// Override bind credentials.
    pub fn with_credentials(
        mut self,
        bind_dn: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.bind_dn = Some(bind_dn.into());
        self.bind_password = Some(password.into());
        self
    }
}
