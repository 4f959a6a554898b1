//! `ldap3` backed transport.

use std::sync::Arc;

use async_trait::async_trait;
use ldap3::{
    parse_refs, Ldap, LdapConnAsync, LdapConnSettings, LdapError, LdapResult, SearchEntry,
    SearchOptions as LdapSearchOptions, SearchStream,
};
use native_tls::{Certificate, Protocol, TlsConnector};
use tracing::{debug, info, warn};

use crate::binary::BinaryAttributeDetector;
use crate::config::ConnectionSecurity;
use crate::transport::{
    BindRequest, DirectorySession, DirectoryTransport, SearchCursor, SearchRequest,
    SearchResponse, TransportSettings,
};

/// Opens real LDAP connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ldap3Transport;

impl Ldap3Transport {
    pub fn new() -> Self {
        Self
    }

    fn conn_settings(settings: &TransportSettings) -> Result<LdapConnSettings, LdapError> {
        let mut conn_settings = LdapConnSettings::new()
            .set_conn_timeout(settings.connect_timeout)
            .set_starttls(settings.security == ConnectionSecurity::StartTls);

        if settings.security != ConnectionSecurity::None {
            conn_settings = conn_settings
                .set_no_tls_verify(!settings.tls.verify_certificate)
                .set_connector(Self::tls_connector(settings)?);
        }

        Ok(conn_settings)
    }

    fn tls_connector(settings: &TransportSettings) -> Result<TlsConnector, LdapError> {
        let tls = &settings.tls;
        let mut builder = TlsConnector::builder();

        let requested = tls
            .ssl_protocol
            .iter()
            .chain(tls.enabled_protocols.iter())
            .filter_map(|name| parse_protocol(name))
            .collect::<Vec<_>>();
        if let Some(min) = requested.iter().copied().min_by_key(|p| protocol_rank(*p)) {
            builder.min_protocol_version(Some(min));
        }
        if !tls.enabled_protocols.is_empty() {
            let max = tls
                .enabled_protocols
                .iter()
                .filter_map(|name| parse_protocol(name))
                .max_by_key(|p| protocol_rank(*p));
            // TLSv1.3 has no native-tls cap; leave the maximum open
            let allows_13 = tls
                .enabled_protocols
                .iter()
                .any(|p| p.eq_ignore_ascii_case("TLSv1.3"));
            if !allows_13 {
                builder.max_protocol_version(max);
            }
        }

        if !tls.enabled_cipher_suites.is_empty() {
            warn!(
                host = %settings.host,
                suites = ?tls.enabled_cipher_suites,
                "Cipher suite restrictions are not supported by the native TLS backend; using platform defaults"
            );
        }

        if let Some(path) = &tls.ca_cert_path {
            let pem = std::fs::read(path).map_err(|source| LdapError::Io { source })?;
            let cert = Certificate::from_pem(&pem).map_err(|source| LdapError::NativeTLS { source })?;
            builder.add_root_certificate(cert);
        }

        builder.danger_accept_invalid_certs(!tls.verify_certificate);
        builder.build().map_err(|source| LdapError::NativeTLS { source })
    }
}

fn parse_protocol(name: &str) -> Option<Protocol> {
    match name.trim().to_ascii_lowercase().as_str() {
        "tlsv1" | "tlsv1.0" => Some(Protocol::Tlsv10),
        "tlsv1.1" => Some(Protocol::Tlsv11),
        // native-tls exposes no 1.3 floor; 1.2 is the closest it can enforce
        "tlsv1.2" | "tlsv1.3" | "tls" => Some(Protocol::Tlsv12),
        other => {
            warn!(protocol = other, "Ignoring unsupported TLS protocol name");
            None
        }
    }
}

fn protocol_rank(protocol: Protocol) -> u8 {
    match protocol {
        Protocol::Sslv3 => 0,
        Protocol::Tlsv10 => 1,
        Protocol::Tlsv11 => 2,
        _ => 3,
    }
}

#[async_trait]
impl DirectoryTransport for Ldap3Transport {
    type Session = Ldap3Session;

    async fn connect(&self, settings: &TransportSettings) -> Result<Option<Ldap3Session>, LdapError> {
        let url = settings.url();
        debug!(url = %url, "Connecting to LDAP server");

        let conn_settings = Self::conn_settings(settings)?;
        let (conn, ldap) = LdapConnAsync::with_settings(conn_settings, &url).await?;

        // Spawn the connection driver
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        info!(url = %url, "LDAP transport connected");

        Ok(Some(Ldap3Session {
            ldap,
            operation_timeout: settings.operation_timeout,
            binary_attributes: Arc::clone(&settings.binary_attributes),
        }))
    }
}

/// An open `ldap3` connection handle.
#[derive(Clone)]
pub struct Ldap3Session {
    ldap: Ldap,
    operation_timeout: Option<std::time::Duration>,
    binary_attributes: Arc<BinaryAttributeDetector>,
}

impl std::fmt::Debug for Ldap3Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ldap3Session")
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DirectorySession for Ldap3Session {
    type Cursor = Ldap3Cursor;

    async fn bind(&mut self, request: &BindRequest) -> Result<LdapResult, LdapError> {
        if let Some(timeout) = self.operation_timeout {
            self.ldap.with_timeout(timeout);
        }
        self.ldap.simple_bind(&request.dn, &request.password).await
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<Ldap3Cursor, LdapError> {
        let options = LdapSearchOptions::new()
            .sizelimit(request.size_limit)
            .timelimit(request.time_limit);
        self.ldap.with_search_options(options);
        if let Some(timeout) = request.timeout.or(self.operation_timeout) {
            self.ldap.with_timeout(timeout);
        }

        let stream = self
            .ldap
            .streaming_search(
                &request.base,
                request.scope,
                &request.filter,
                request.attributes.clone(),
            )
            .await?;

        Ok(Ldap3Cursor {
            stream,
            binary_attributes: Arc::clone(&self.binary_attributes),
            exhausted: false,
            done: false,
        })
    }

    fn is_connected(&self) -> bool {
        let mut handle = self.ldap.clone();
        !handle.is_closed()
    }

    async fn close(&mut self) -> Result<(), LdapError> {
        self.ldap.unbind().await
    }
}

/// Streaming search over an `ldap3` connection.
pub struct Ldap3Cursor {
    stream: SearchStream<'static, String, Vec<String>>,
    binary_attributes: Arc<BinaryAttributeDetector>,
    exhausted: bool,
    done: bool,
}

#[async_trait]
impl SearchCursor for Ldap3Cursor {
    async fn next(&mut self) -> Result<Option<SearchResponse>, LdapError> {
        let entry = match self.stream.next().await {
            Ok(entry) => entry,
            Err(e) => {
                // a failed stream is torn down by ldap3 itself
                self.done = true;
                return Err(e);
            }
        };

        let Some(entry) = entry else {
            self.exhausted = true;
            return Ok(None);
        };

        let response = if entry.is_ref() {
            SearchResponse::Reference(parse_refs(entry.0))
        } else if entry.is_intermediate() {
            SearchResponse::Intermediate
        } else {
            SearchResponse::Entry(self.binary_attributes.classify(SearchEntry::construct(entry)))
        };
        Ok(Some(response))
    }

    async fn search_done(&mut self) -> Option<LdapResult> {
        if !self.exhausted || self.done {
            return None;
        }
        self.done = true;
        Some(self.stream.finish().await)
    }

    fn is_done(&self) -> bool {
        self.done
    }

    async fn abandon(&mut self) -> Result<(), LdapError> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        let handle = self.stream.ldap_handle();
        let msgid = handle.last_id();
        handle.abandon(msgid).await
    }

    fn cancel(&mut self) {
        if self.done {
            return;
        }
        self.done = true;

        let mut handle = self.stream.ldap_handle().clone();
        let msgid = handle.last_id();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = handle.abandon(msgid).await {
                        debug!(error = %e, "Best-effort abandon failed");
                    }
                });
            }
            Err(_) => debug!("No runtime available to abandon search"),
        }
    }
}
