//! Connection manager: server registry, DN routing and connection lifecycle.
//!
//! The manager owns one [`ServerRecord`] per known directory server. The
//! default record comes from the top-level configuration and always exists;
//! further records come from configuration or are registered on the fly when
//! a referral points at a server nobody configured. Every record holds at
//! most one open, bound session, opened lazily on first use.

use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn, Level};
use xavyo_connector::config::ConnectorConfig;
use xavyo_connector::error::{ConnectorError, ConnectorResult};

use crate::binary::BinaryAttributeDetector;
use crate::classifier::{
    format_ldap_message, result_code, DefaultErrorClassifier, ErrorClassifier, ErrorDisposition,
};
use crate::config::LdapConfig;
use crate::dn::{CaseIgnoreSchema, Dn, DnSchema};
use crate::ldap_url::{LdapUrl, Referral};
use crate::server::ServerRecord;
use crate::transport::{DirectorySession, DirectoryTransport, TransportSettings};

/// Shared handle to a server record managed by `ConnectionManager<T>`.
pub type ServerRef<T> = Arc<ServerRecord<<T as DirectoryTransport>::Session>>;

struct Registry<S> {
    servers: Vec<Arc<ServerRecord<S>>>,
    rng: StdRng,
}

/// Routes operations to directory servers and owns their connections.
pub struct ConnectionManager<T: DirectoryTransport> {
    config: LdapConfig,
    transport: T,
    default_server: ServerRef<T>,
    registry: Mutex<Registry<T::Session>>,
    schema: Arc<dyn DnSchema>,
    classifier: Arc<dyn ErrorClassifier>,
    binary_attributes: Arc<BinaryAttributeDetector>,
}

impl<T: DirectoryTransport> ConnectionManager<T> {
    /// Create a manager using the case-ignore schema.
    pub fn new(config: LdapConfig, transport: T) -> ConnectorResult<Self> {
        Self::with_schema(config, transport, Arc::new(CaseIgnoreSchema))
    }

    /// Create a manager that qualifies DNs with `schema`.
    pub fn with_schema(
        config: LdapConfig,
        transport: T,
        schema: Arc<dyn DnSchema>,
    ) -> ConnectorResult<Self> {
        config.validate()?;

        let default_server = Arc::new(ServerRecord::from_config(&config, schema.as_ref())?);
        let mut servers = Vec::with_capacity(config.servers.len() + 1);
        servers.push(Arc::clone(&default_server));
        for server in &config.servers {
            servers.push(Arc::new(ServerRecord::from_server_config(
                server,
                &config,
                schema.as_ref(),
            )?));
        }

        info!(
            default_server = %default_server,
            configured_servers = servers.len(),
            "LDAP connection manager created"
        );

        Ok(Self {
            binary_attributes: Arc::new(BinaryAttributeDetector::new(&config.binary_attributes)),
            config,
            transport,
            default_server,
            registry: Mutex::new(Registry {
                servers,
                rng: StdRng::from_entropy(),
            }),
            schema,
            classifier: Arc::new(DefaultErrorClassifier),
        })
    }

    /// Replace the random source used for load balancing and referral URL choice.
    #[must_use]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.registry.get_mut().rng = rng;
        self
    }

    /// Replace the classifier used to translate connect and bind failures.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// The configuration the manager was built from.
    pub fn config(&self) -> &LdapConfig {
        &self.config
    }

    /// The schema used to qualify DNs.
    pub fn schema(&self) -> &dyn DnSchema {
        self.schema.as_ref()
    }

    /// The error classifier.
    pub fn classifier(&self) -> Arc<dyn ErrorClassifier> {
        Arc::clone(&self.classifier)
    }

    /// Detector handed to every connection for binary attribute handling.
    pub fn binary_attribute_detector(&self) -> Arc<BinaryAttributeDetector> {
        Arc::clone(&self.binary_attributes)
    }

    /// The default server record.
    pub fn default_server(&self) -> ServerRef<T> {
        Arc::clone(&self.default_server)
    }

    /// Snapshot of all registered servers, in registration order.
    pub async fn servers(&self) -> Vec<ServerRef<T>> {
        self.registry.lock().await.servers.clone()
    }

    /// Multi-line description of the registry, one server per line.
    pub async fn dump_servers(&self) -> String {
        let registry = self.registry.lock().await;
        self.dump(&registry.servers)
    }

    fn dump(&self, servers: &[ServerRef<T>]) -> String {
        servers
            .iter()
            .enumerate()
            .map(|(index, server)| {
                let marker = if Arc::ptr_eq(server, &self.default_server) {
                    " DEFAULT"
                } else {
                    ""
                };
                format!("{index}: {server}{marker}")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Select the server responsible for `dn`.
    ///
    /// The most specific base context that equals or contains `dn` wins;
    /// equally specific servers are chosen between at random. Without any
    /// match, configured servers without a base context are the candidates.
    /// The default server is returned when nothing else qualifies, and always
    /// for DNs that are not schema-qualified.
    pub async fn select_server(&self, dn: &Dn) -> ServerRef<T> {
        if !dn.is_schema_qualified() {
            debug!(dn = %dn, "DN is not schema-qualified, using default server");
            return self.default_server();
        }

        let mut registry = self.registry.lock().await;

        let mut best: Option<&Dn> = None;
        for server in &registry.servers {
            let Some(context) = server.base_context() else {
                continue;
            };
            if context == dn {
                best = Some(context);
                break;
            }
            if context.is_ancestor_of(dn) {
                match best {
                    Some(current) if !context.is_descendant_of(current) => {}
                    _ => best = Some(context),
                }
            }
        }
        let best = best.cloned();

        let candidates: Vec<ServerRef<T>> = registry
            .servers
            .iter()
            .filter(|server| match &best {
                Some(context) => server.base_context() == Some(context),
                None => server.base_context().is_none() && !server.is_referral(),
            })
            .cloned()
            .collect();

        let selected = if candidates.is_empty() {
            self.default_server()
        } else {
            let index = registry.rng.gen_range(0..candidates.len());
            Arc::clone(&candidates[index])
        };

        if tracing::enabled!(Level::DEBUG) {
            debug!(
                dn = %dn,
                server = %selected,
                candidates = candidates.len(),
                servers = %self.dump(&registry.servers),
                "Selected server"
            );
        }
        selected
    }

    /// Select the server a referral URL points at, registering it if unknown.
    pub async fn select_server_for_url(&self, dn: &Dn, url: &LdapUrl) -> ServerRef<T> {
        let mut registry = self.registry.lock().await;

        if let Some(server) = registry
            .servers
            .iter()
            .find(|server| server.matches(url, self.schema.as_ref()))
        {
            debug!(dn = %dn, url = %url, server = %server, "Referral matches known server");
            return Arc::clone(server);
        }

        let server = Arc::new(ServerRecord::from_referral(
            url,
            &self.default_server,
            self.schema.as_ref(),
        ));
        registry.servers.push(Arc::clone(&server));
        info!(dn = %dn, url = %url, server = %server, "Registered server from referral");
        server
    }

    /// Connection to the server responsible for `dn`.
    #[instrument(skip(self, dn), fields(dn = %dn))]
    pub async fn get_connection(&self, dn: &Dn) -> ConnectorResult<T::Session> {
        let server = self.select_server(dn).await;
        self.connect_server(&server).await
    }

    /// Connection to one of the servers named by `referral`.
    ///
    /// Returns `Ok(None)` when the referral carries no URL.
    #[instrument(skip(self, dn, referral), fields(dn = %dn, referral = %referral))]
    pub async fn get_connection_for_referral(
        &self,
        dn: &Dn,
        referral: &Referral,
    ) -> ConnectorResult<Option<T::Session>> {
        match self.select_server_for_referral(dn, referral).await? {
            Some(server) => self.connect_server(&server).await.map(Some),
            None => Ok(None),
        }
    }

    /// Pick one of the referral's URLs at random and select its server.
    ///
    /// Returns `Ok(None)` when the referral carries no URL.
    pub async fn select_server_for_referral(
        &self,
        dn: &Dn,
        referral: &Referral,
    ) -> ConnectorResult<Option<ServerRef<T>>> {
        if referral.is_empty() {
            debug!(dn = %dn, "Referral carries no URL");
            return Ok(None);
        }

        let chosen = {
            let mut registry = self.registry.lock().await;
            let index = registry.rng.gen_range(0..referral.urls().len());
            referral.urls()[index].clone()
        };

        let url = LdapUrl::parse(&chosen).map_err(|e| ConnectorError::ReferralUnavailable {
            referral: e.to_string(),
        })?;
        Ok(Some(self.select_server_for_url(dn, &url).await))
    }

    /// Connection to the server `url` points at.
    #[instrument(skip(self, dn, url), fields(dn = %dn, url = %url))]
    pub async fn get_connection_for_url(
        &self,
        dn: &Dn,
        url: &LdapUrl,
    ) -> ConnectorResult<T::Session> {
        let server = self.select_server_for_url(dn, url).await;
        self.connect_server(&server).await
    }

    /// Connection to the default server.
    pub async fn get_default_connection(&self) -> ConnectorResult<T::Session> {
        self.connect_server(&self.default_server).await
    }

    /// Connect the default server.
    pub async fn connect(&self) -> ConnectorResult<()> {
        self.get_default_connection().await.map(|_| ())
    }

    /// Transport settings for connecting `server`.
    pub fn transport_settings(&self, server: &ServerRecord<T::Session>) -> TransportSettings {
        TransportSettings {
            host: server.host().to_string(),
            port: server.port(),
            security: server.security(),
            connect_timeout: server.connect_timeout(),
            operation_timeout: server.operation_timeout(),
            tls: server.tls().clone(),
            binary_attributes: self.binary_attribute_detector(),
        }
    }

    /// Return the open session of `server`, connecting and binding first if needed.
    ///
    /// A stored session whose transport reports itself closed is discarded
    /// and replaced. Nothing is stored unless both connect and bind succeed.
    pub async fn connect_server(
        &self,
        server: &ServerRecord<T::Session>,
    ) -> ConnectorResult<T::Session> {
        let mut slot = server.session_slot().lock().await;

        if let Some(session) = slot.as_ref() {
            if session.is_connected() {
                return Ok(session.clone());
            }
            debug!(server = %server, "Stored connection is closed, reconnecting");
            *slot = None;
        }

        let host = server.host();
        let port = server.port();
        let settings = self.transport_settings(server);

        debug!(server = %server, "Connecting to LDAP server");
        let opened = self.transport.connect(&settings).await.map_err(|e| {
            if self.classifier.classify_transport(&e) == ErrorDisposition::Reconnect {
                ConnectorError::connection_failed_with_source(
                    format!("Unable to connect to LDAP server {host}:{port}"),
                    e,
                )
            } else {
                self.classifier.transport_error(e, host, port)
            }
        })?;
        let mut session = opened.ok_or_else(|| {
            ConnectorError::connection_failed(format!(
                "Unable to connect to LDAP server {host}:{port} due to unknown reasons"
            ))
        })?;

        if server.bind_dn().is_empty() {
            debug!(server = %server, "No bind DN configured, binding anonymously");
        }
        let outcome = {
            let request = server.bind_request();
            session.bind(&request).await
        };
        let failure = match outcome {
            Ok(result) if result.rc == result_code::SUCCESS => None,
            Ok(result) => Some(ConnectorError::BindFailed {
                host: host.to_string(),
                port,
                bind_dn: server.bind_dn().to_string(),
                result_code: result.rc,
                message: format_ldap_message(&result),
            }),
            Err(e) => Some(self.classifier.transport_error(e, host, port)),
        };
        if let Some(err) = failure {
            if let Err(close_err) = session.close().await {
                debug!(server = %server, error = %close_err, "Closing unbound connection failed");
            }
            warn!(server = %server, error = %err, "LDAP bind failed");
            return Err(err);
        }

        info!(server = %server, bind_dn = %server.bind_dn(), "LDAP connection established successfully");
        *slot = Some(session.clone());
        Ok(session)
    }

    /// Whether the default server holds a session whose transport is open.
    pub async fn is_connected(&self) -> bool {
        self.default_server.is_connected().await
    }

    /// Whether the default server's connection is usable.
    pub async fn is_alive(&self) -> bool {
        // TODO: send a WhoAmI extended operation so half-open connections are detected
        self.is_connected().await
    }

    /// Close every open connection.
    ///
    /// All servers are attempted even if some fail; the last failure is
    /// returned once the sweep is complete.
    #[instrument(skip(self))]
    pub async fn close(&self) -> ConnectorResult<()> {
        let mut last_error = None;

        for server in self.servers().await {
            let Some(mut session) = server.session_slot().lock().await.take() else {
                continue;
            };
            match session.close().await {
                Ok(()) => debug!(server = %server, "Closed LDAP connection"),
                Err(e) => {
                    warn!(server = %server, error = %e, "Error closing LDAP connection");
                    last_error = Some(self.classifier.transport_error(e, server.host(), server.port()));
                }
            }
        }

        match last_error {
            Some(err) => Err(err),
            None => {
                info!("LDAP connection manager closed");
                Ok(())
            }
        }
    }
}

impl<T: DirectoryTransport> fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("default_server", &self.default_server)
            .field("config", &self.config.redacted())
            .finish_non_exhaustive()
    }
}
