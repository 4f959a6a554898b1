//! Transport seam between the connection manager and the LDAP client library.
//!
//! The manager and the search strategies only ever talk to these traits. The
//! production implementation lives in [`crate::network`]; tests script their
//! own.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{LdapError, LdapResult, Scope, SearchEntry};
use xavyo_connector::config::TlsConfig;
use zeroize::Zeroizing;

use crate::binary::BinaryAttributeDetector;
use crate::config::ConnectionSecurity;

/// Everything the transport needs to open one connection.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub host: String,
    pub port: u16,
    pub security: ConnectionSecurity,
    pub connect_timeout: Duration,
    /// Response timeout applied to bind and search operations.
    pub operation_timeout: Option<Duration>,
    pub tls: TlsConfig,
    pub binary_attributes: Arc<BinaryAttributeDetector>,
}

impl TransportSettings {
    /// URL the transport dials.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.security.scheme(), self.host, self.port)
    }
}

/// Simple bind request. The password is wiped when the request is dropped.
pub struct BindRequest {
    pub dn: String,
    pub password: Zeroizing<String>,
}

impl fmt::Debug for BindRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindRequest")
            .field("dn", &self.dn)
            .field("password", &"***REDACTED***")
            .finish()
    }
}

/// A fully configured search request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub base: String,
    pub scope: Scope,
    pub filter: String,
    pub attributes: Vec<String>,
    /// Server-side size limit. Zero means unlimited.
    pub size_limit: i32,
    /// Server-side time limit in seconds. Zero means unlimited.
    pub time_limit: i32,
    /// Client-side response timeout.
    pub timeout: Option<Duration>,
}

impl SearchRequest {
    /// Request with no limits.
    pub fn new(
        base: impl Into<String>,
        scope: Scope,
        filter: impl Into<String>,
        attributes: Vec<String>,
    ) -> Self {
        Self {
            base: base.into(),
            scope,
            filter: filter.into(),
            attributes,
            size_limit: 0,
            time_limit: 0,
            timeout: None,
        }
    }
}

/// One response read from a search cursor.
#[derive(Debug, Clone)]
pub enum SearchResponse {
    /// A search result entry.
    Entry(SearchEntry),
    /// A continuation reference carrying referral URLs.
    Reference(Vec<String>),
    /// An intermediate response.
    Intermediate,
}

/// Opens connections.
#[async_trait]
pub trait DirectoryTransport: Send + Sync + 'static {
    type Session: DirectorySession;

    /// Open a connection.
    ///
    /// `Ok(None)` means the transport declined to connect without reporting
    /// a reason.
    async fn connect(&self, settings: &TransportSettings) -> Result<Option<Self::Session>, LdapError>;
}

/// One open connection.
///
/// Sessions are cheap handles: clones share the same underlying connection.
#[async_trait]
pub trait DirectorySession: Clone + Send + Sync + 'static {
    type Cursor: SearchCursor;

    /// Perform a simple bind.
    async fn bind(&mut self, request: &BindRequest) -> Result<LdapResult, LdapError>;

    /// Start a streaming search.
    async fn search(&mut self, request: &SearchRequest) -> Result<Self::Cursor, LdapError>;

    /// Whether the underlying connection is still open.
    fn is_connected(&self) -> bool;

    /// Unbind and close the connection.
    async fn close(&mut self) -> Result<(), LdapError>;
}

/// Streaming handle over an in-flight search.
#[async_trait]
pub trait SearchCursor: Send + 'static {
    /// Advance to the next response. `Ok(None)` once the stream is exhausted.
    async fn next(&mut self) -> Result<Option<SearchResponse>, LdapError>;

    /// Read the terminal result frame.
    ///
    /// Only available once the cursor is exhausted, and only once. Reading it
    /// marks the operation complete.
    async fn search_done(&mut self) -> Option<LdapResult>;

    /// Whether the operation has completed on the wire (finished, failed or abandoned).
    fn is_done(&self) -> bool;

    /// Abandon the operation if it is still in flight.
    async fn abandon(&mut self) -> Result<(), LdapError>;

    /// Non-blocking best-effort abandon, usable from `Drop`.
    fn cancel(&mut self);
}
