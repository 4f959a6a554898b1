//! Search strategies.
//!
//! A strategy runs one logical search to completion on top of a
//! [`ConnectionManager`]. Strategies share the building blocks in this
//! module: connection resolution, request construction and progress state.

pub mod cursor;
pub mod default;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Scope, SearchEntry};
use tracing::debug;
use xavyo_connector::error::{ConnectorError, ConnectorResult};
use xavyo_connector::resilience::RetryConfig;

use crate::config::{LdapConfig, ReferralStrategy};
use crate::dn::Dn;
use crate::ldap_url::Referral;
use crate::manager::{ConnectionManager, ServerRef};
use crate::transport::{DirectorySession, DirectoryTransport, SearchRequest};

pub use cursor::CursorGuard;
pub use default::{DefaultSearchStrategy, PassOutcome};

/// Per-operation search options.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// End a size-limited search with partial results instead of an error.
    pub allow_partial_results: bool,
    pub referral_strategy: ReferralStrategy,
    pub size_limit: i32,
    pub time_limit: i32,
    pub operation_timeout: Option<Duration>,
    pub retry: RetryConfig,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            allow_partial_results: false,
            referral_strategy: ReferralStrategy::default(),
            size_limit: 0,
            time_limit: 0,
            operation_timeout: None,
            retry: RetryConfig::default(),
        }
    }
}

impl SearchOptions {
    /// Options taken from the connector configuration.
    pub fn from_config(config: &LdapConfig) -> Self {
        Self {
            allow_partial_results: config.allow_partial_results,
            referral_strategy: config.referral_strategy,
            size_limit: config.size_limit,
            time_limit: config.time_limit,
            operation_timeout: config.connection.operation_timeout(),
            retry: config.retry.clone(),
        }
    }

    #[must_use]
    pub fn with_allow_partial_results(mut self, allow: bool) -> Self {
        self.allow_partial_results = allow;
        self
    }

    #[must_use]
    pub fn with_referral_strategy(mut self, strategy: ReferralStrategy) -> Self {
        self.referral_strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_size_limit(mut self, size_limit: i32) -> Self {
        self.size_limit = size_limit;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Build the protocol request, applying limits and timeout.
    pub fn build_request(
        &self,
        base: &Dn,
        filter: &str,
        scope: Scope,
        attributes: &[String],
    ) -> SearchRequest {
        SearchRequest {
            size_limit: self.size_limit,
            time_limit: self.time_limit,
            timeout: self.operation_timeout,
            ..SearchRequest::new(base.as_str(), scope, filter, attributes.to_vec())
        }
    }
}

/// Progress of the current search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchState {
    /// False when a size limit truncated the results and partial results were allowed.
    pub complete_result_set: bool,
    /// Entries delivered to the handler, counting redeliveries after a reconnect.
    pub entries_found: u64,
    /// Passes over the request, including the first.
    pub retry_attempts: u32,
    /// The last referral seen, used to re-target reconnects.
    pub last_referral: Option<Referral>,
}

impl Default for SearchState {
    fn default() -> Self {
        Self {
            complete_result_set: true,
            entries_found: 0,
            retry_attempts: 0,
            last_referral: None,
        }
    }
}

/// Receives translated search results. Returning `false` stops the search.
pub trait ResultsHandler<O>: Send {
    fn handle(&mut self, object: O) -> bool;
}

impl<O, F> ResultsHandler<O> for F
where
    F: FnMut(O) -> bool + Send,
{
    fn handle(&mut self, object: O) -> bool {
        self(object)
    }
}

/// Turns raw entries into the caller's object model.
pub trait EntryTranslator: Send + Sync {
    type Output: Send;

    fn translate(&self, entry: SearchEntry) -> ConnectorResult<Self::Output>;
}

/// Hands entries through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughTranslator;

impl EntryTranslator for PassThroughTranslator {
    type Output = SearchEntry;

    fn translate(&self, entry: SearchEntry) -> ConnectorResult<SearchEntry> {
        Ok(entry)
    }
}

/// A search strategy.
#[async_trait]
pub trait SearchStrategy: Send {
    /// Run one search to completion, delivering results to the handler.
    async fn search(
        &mut self,
        base: &Dn,
        filter: &str,
        scope: Scope,
        attributes: &[String],
    ) -> ConnectorResult<()>;

    /// Progress of the last search.
    fn state(&self) -> &SearchState;
}

/// An open session together with the server it belongs to.
pub struct Connection<T: DirectoryTransport> {
    pub server: ServerRef<T>,
    pub session: T::Session,
}

impl<T: DirectoryTransport> Clone for Connection<T> {
    fn clone(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
            session: self.session.clone(),
        }
    }
}

impl<T: DirectoryTransport> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("server", &self.server.to_string())
            .finish_non_exhaustive()
    }
}

/// Connection for `base`, or for the remembered referral when there is one.
pub(crate) async fn resolve_connection<T: DirectoryTransport>(
    manager: &ConnectionManager<T>,
    base: &Dn,
    referral: Option<&Referral>,
) -> ConnectorResult<Connection<T>> {
    match referral {
        Some(referral) => connect_referral(manager, base, referral).await,
        None => {
            let server = manager.select_server(base).await;
            let session = manager.connect_server(&server).await?;
            Ok(Connection { server, session })
        }
    }
}

/// Connection to a server named by `referral`.
pub(crate) async fn connect_referral<T: DirectoryTransport>(
    manager: &ConnectionManager<T>,
    base: &Dn,
    referral: &Referral,
) -> ConnectorResult<Connection<T>> {
    let server = manager
        .select_server_for_referral(base, referral)
        .await?
        .ok_or_else(|| ConnectorError::ReferralUnavailable {
            referral: referral.to_string(),
        })?;
    let session = manager.connect_server(&server).await?;
    Ok(Connection { server, session })
}

/// Drop a connection whose transport failed so the next resolution reopens it.
pub(crate) async fn discard_connection<T: DirectoryTransport>(mut connection: Connection<T>) {
    debug!(server = %connection.server, "Discarding failed connection");
    if let Err(e) = connection.session.close().await {
        debug!(server = %connection.server, error = %e, "Closing failed connection reported an error");
    }
}

/// Hand a connection back to the idle state.
///
/// Releasing only ends this handle's scope. The session is not closed: it
/// stays stored on its server record and is reused by the next operation.
pub(crate) fn release_connection<T: DirectoryTransport>(connection: Connection<T>) {
    debug!(server = %connection.server, "Releasing connection");
    drop(connection);
}
