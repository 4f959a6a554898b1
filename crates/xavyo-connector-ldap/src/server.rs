//! Server records: one directory endpoint plus its live session, if any.

use std::fmt;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;
use xavyo_connector::config::TlsConfig;
use xavyo_connector::error::{ConnectorError, ConnectorResult};
use xavyo_connector::secret::GuardedSecret;
use zeroize::Zeroizing;

use crate::config::{ConnectionSecurity, LdapConfig, ServerConfig};
use crate::dn::{Dn, DnSchema};
use crate::ldap_url::LdapUrl;
use crate::transport::{BindRequest, DirectorySession};

/// Where a server record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOrigin {
    /// Static configuration. Always present.
    Configured,
    /// Discovered by following a referral.
    Referral,
}

impl fmt::Display for ServerOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerOrigin::Configured => f.write_str("configured"),
            ServerOrigin::Referral => f.write_str("referral"),
        }
    }
}

/// One directory endpoint.
///
/// Everything except the session is fixed at construction. The session slot
/// holds at most one open, bound connection; its lock is held across
/// connect and bind.
pub struct ServerRecord<S> {
    host: String,
    port: u16,
    security: ConnectionSecurity,
    connect_timeout: Duration,
    operation_timeout: Option<Duration>,
    tls: TlsConfig,
    base_context: Option<Dn>,
    bind_dn: String,
    bind_secret: Option<GuardedSecret>,
    origin: ServerOrigin,
    session: Mutex<Option<S>>,
}

impl<S> ServerRecord<S> {
    /// Build the default record from the top-level configuration.
    pub fn from_config(config: &LdapConfig, schema: &dyn DnSchema) -> ConnectorResult<Self> {
        Ok(Self {
            host: config.host.clone(),
            port: config.effective_port(),
            security: config.connection_security,
            connect_timeout: config.connection.connection_timeout(),
            operation_timeout: config.connection.operation_timeout(),
            tls: config.tls.clone(),
            base_context: qualify_base_context(config.base_context.as_deref(), schema)?,
            bind_dn: config.bind_dn.clone(),
            bind_secret: config.bind_password.as_deref().map(GuardedSecret::new),
            origin: ServerOrigin::Configured,
            session: Mutex::new(None),
        })
    }

    /// Build an additional configured record. Unset fields come from `defaults`.
    pub fn from_server_config(
        server: &ServerConfig,
        defaults: &LdapConfig,
        schema: &dyn DnSchema,
    ) -> ConnectorResult<Self> {
        let security = server
            .connection_security
            .unwrap_or(defaults.connection_security);
        let connect_timeout = server
            .connect_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| defaults.connection.connection_timeout());
        let password = server
            .bind_password
            .as_deref()
            .or(defaults.bind_password.as_deref());

        Ok(Self {
            host: server.host.clone(),
            port: server.port.unwrap_or_else(|| security.default_port()),
            security,
            connect_timeout,
            operation_timeout: defaults.connection.operation_timeout(),
            tls: defaults.tls.clone(),
            base_context: qualify_base_context(server.base_context.as_deref(), schema)?,
            bind_dn: server
                .bind_dn
                .clone()
                .unwrap_or_else(|| defaults.bind_dn.clone()),
            bind_secret: password.map(GuardedSecret::new),
            origin: ServerOrigin::Configured,
            session: Mutex::new(None),
        })
    }

    /// Build a record for a referral target, inheriting credentials and
    /// timeouts from `template` (the default record).
    pub fn from_referral<T>(url: &LdapUrl, template: &ServerRecord<T>, schema: &dyn DnSchema) -> Self {
        let security = if url.is_secure() {
            ConnectionSecurity::Ssl
        } else if template.security == ConnectionSecurity::StartTls {
            ConnectionSecurity::StartTls
        } else {
            ConnectionSecurity::None
        };

        Self {
            host: url.host().to_string(),
            port: url.port(),
            security,
            connect_timeout: template.connect_timeout,
            operation_timeout: template.operation_timeout,
            tls: template.tls.clone(),
            base_context: url_base_context(url, schema),
            bind_dn: template.bind_dn.clone(),
            bind_secret: template.bind_secret.clone(),
            origin: ServerOrigin::Referral,
            session: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn security(&self) -> ConnectionSecurity {
        self.security
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout
    }

    pub fn tls(&self) -> &TlsConfig {
        &self.tls
    }

    /// Naming context this server is authoritative for.
    pub fn base_context(&self) -> Option<&Dn> {
        self.base_context.as_ref()
    }

    pub fn bind_dn(&self) -> &str {
        &self.bind_dn
    }

    pub fn origin(&self) -> ServerOrigin {
        self.origin
    }

    /// Whether the record was discovered through a referral.
    pub fn is_referral(&self) -> bool {
        self.origin == ServerOrigin::Referral
    }

    /// Whether this record describes the target of `url`.
    pub fn matches(&self, url: &LdapUrl, schema: &dyn DnSchema) -> bool {
        self.host.eq_ignore_ascii_case(url.host())
            && self.port == url.port()
            && self.base_context == url_base_context(url, schema)
    }

    /// Build the bind request. The secret is read exactly once.
    pub(crate) fn bind_request(&self) -> BindRequest {
        let password = match &self.bind_secret {
            Some(secret) => secret.access(|value| Zeroizing::new(value.to_string())),
            None => Zeroizing::new(String::new()),
        };
        BindRequest {
            dn: self.bind_dn.clone(),
            password,
        }
    }

    /// The session slot.
    pub(crate) fn session_slot(&self) -> &Mutex<Option<S>> {
        &self.session
    }
}

impl<S: DirectorySession> ServerRecord<S> {
    /// Handle to the stored session, if any.
    pub async fn session(&self) -> Option<S> {
        self.session.lock().await.clone()
    }

    /// Whether a session is stored.
    pub async fn has_session(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Whether a session is stored and its transport reports itself open.
    pub async fn is_connected(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|session| session.is_connected())
    }
}

impl<S> fmt::Display for ServerRecord<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}/{} ({})",
            self.security.scheme(),
            self.host,
            self.port,
            self.base_context.as_ref().map(Dn::as_str).unwrap_or_default(),
            self.origin
        )
    }
}

impl<S> fmt::Debug for ServerRecord<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRecord")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("base_context", &self.base_context.as_ref().map(Dn::as_str))
            .field("bind_dn", &self.bind_dn)
            .field("bind_secret", &self.bind_secret)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

fn qualify_base_context(
    base_context: Option<&str>,
    schema: &dyn DnSchema,
) -> ConnectorResult<Option<Dn>> {
    match base_context.map(str::trim) {
        None | Some("") => Ok(None),
        Some(base) => schema.parse_qualified(base).map(Some).map_err(|e| {
            ConnectorError::invalid_configuration(format!("invalid base_context: {e}"))
        }),
    }
}

/// Base DN of a referral URL, schema-qualified when possible.
fn url_base_context(url: &LdapUrl, schema: &dyn DnSchema) -> Option<Dn> {
    match url.dn() {
        Ok(Some(dn)) => match schema.qualify(&dn) {
            Ok(qualified) => Some(qualified),
            Err(e) => {
                debug!(url = %url, error = %e, "Referral base DN is not schema-qualified");
                Some(dn)
            }
        },
        Ok(None) => None,
        Err(e) => {
            debug!(url = %url, error = %e, "Ignoring unparsable referral base DN");
            None
        }
    }
}
