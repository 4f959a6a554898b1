//! The default (non-paged) search strategy.
//!
//! One logical search is driven as a series of passes. Each pass issues the
//! request on the current connection, streams every response to the handler
//! and then inspects the terminal result. The pass reports a [`PassOutcome`]
//! and the driver loop decides whether to stop, retry on the same
//! connection, reconnect, or follow a referral.
//!
//! A pass restarted after a reconnect re-issues the identical request, so
//! entries delivered before a mid-stream disconnect are delivered again.

use std::sync::Arc;

use async_trait::async_trait;
use ldap3::{LdapError, LdapResult, Scope};
use tracing::{debug, error, info, instrument, warn};
use xavyo_connector::error::{ConnectorError, ConnectorResult};

use crate::classifier::{format_ldap_message, result_code, ErrorClassifier, ErrorDisposition};
use crate::config::ReferralStrategy;
use crate::dn::Dn;
use crate::ldap_url::Referral;
use crate::manager::ConnectionManager;
use crate::transport::{DirectorySession, DirectoryTransport, SearchRequest, SearchResponse};

use super::cursor::CursorGuard;
use super::{
    connect_referral, discard_connection, release_connection, resolve_connection, Connection,
    EntryTranslator, ResultsHandler, SearchOptions, SearchState, SearchStrategy,
};

/// How a single pass over the request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The search is complete.
    Done,
    /// Re-issue the request on the same connection.
    RetrySameServer,
    /// The connection failed; re-resolve and re-issue the request.
    Reconnect,
    /// Continue on a server named by the referral.
    FollowReferral(Referral),
}

/// Streams a search to completion, surviving connection loss and referrals.
pub struct DefaultSearchStrategy<T, X, H>
where
    T: DirectoryTransport,
    X: EntryTranslator,
    H: ResultsHandler<X::Output>,
{
    manager: Arc<ConnectionManager<T>>,
    options: SearchOptions,
    translator: X,
    handler: H,
    classifier: Arc<dyn ErrorClassifier>,
    connection: Option<Connection<T>>,
    state: SearchState,
}

impl<T, X, H> DefaultSearchStrategy<T, X, H>
where
    T: DirectoryTransport,
    X: EntryTranslator,
    H: ResultsHandler<X::Output>,
{
    pub fn new(
        manager: Arc<ConnectionManager<T>>,
        options: SearchOptions,
        translator: X,
        handler: H,
    ) -> Self {
        let classifier = manager.classifier();
        Self {
            manager,
            options,
            translator,
            handler,
            classifier,
            connection: None,
            state: SearchState::default(),
        }
    }

    /// Use `classifier` for failures during the search.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Start on `connection` instead of resolving one from the base DN.
    #[must_use]
    pub fn with_connection(mut self, connection: Connection<T>) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// Give back the handler, e.g. to inspect what it collected.
    pub fn into_handler(self) -> H {
        self.handler
    }

    async fn run_pass(
        &mut self,
        request: &SearchRequest,
        connection: &mut Connection<T>,
    ) -> ConnectorResult<PassOutcome> {
        let cursor = match connection.session.search(request).await {
            Ok(cursor) => cursor,
            Err(e) => return self.transport_outcome(e, connection),
        };
        let mut guard = CursorGuard::new(cursor);

        loop {
            let response = match guard.next().await {
                Ok(Some(response)) => response,
                Ok(None) => break,
                Err(e) => return self.transport_outcome(e, connection),
            };

            match response {
                SearchResponse::Entry(entry) => {
                    self.state.entries_found += 1;
                    let object = self.translator.translate(entry)?;
                    if !self.handler.handle(object) {
                        debug!(
                            entries_found = self.state.entries_found,
                            "Handler stopped the search"
                        );
                        guard.abandon().await;
                        return Ok(PassOutcome::Done);
                    }
                }
                other => warn!(response = ?other, "Skipping unexpected search response"),
            }
        }

        let done = guard.finish().await;
        guard.close().await;

        match done {
            Some(result) => self.result_outcome(result, connection),
            None => {
                debug!("Search ended without a terminal result");
                Ok(PassOutcome::Done)
            }
        }
    }

    fn transport_outcome(
        &self,
        error: LdapError,
        connection: &Connection<T>,
    ) -> ConnectorResult<PassOutcome> {
        match self.classifier.classify_transport(&error) {
            ErrorDisposition::Reconnect => {
                warn!(server = %connection.server, error = %error, "Connection failure during search, reconnecting");
                Ok(PassOutcome::Reconnect)
            }
            ErrorDisposition::RetrySameServer => {
                warn!(server = %connection.server, error = %error, "Transient failure during search, retrying");
                Ok(PassOutcome::RetrySameServer)
            }
            ErrorDisposition::FollowReferral | ErrorDisposition::Fatal => Err(self
                .classifier
                .transport_error(error, connection.server.host(), connection.server.port())),
        }
    }

    fn result_outcome(
        &mut self,
        result: LdapResult,
        connection: &Connection<T>,
    ) -> ConnectorResult<PassOutcome> {
        match result.rc {
            result_code::REFERRAL if self.options.referral_strategy != ReferralStrategy::Throw => {
                let referral = Referral::from_result(&result);
                self.state.last_referral = Some(referral.clone());
                if self.options.referral_strategy == ReferralStrategy::Ignore {
                    debug!(referral = %referral, "Ignoring referral");
                    return Ok(PassOutcome::Done);
                }
                debug!(referral = %referral, "Following referral");
                Ok(PassOutcome::FollowReferral(referral))
            }
            result_code::SUCCESS => Ok(PassOutcome::Done),
            result_code::SIZE_LIMIT_EXCEEDED if self.options.allow_partial_results => {
                self.state.complete_result_set = false;
                info!(
                    entries_found = self.state.entries_found,
                    "Size limit exceeded, returning partial results"
                );
                Ok(PassOutcome::Done)
            }
            _ => match self.classifier.classify_result(&result) {
                ErrorDisposition::RetrySameServer => {
                    warn!(server = %connection.server, result = %format_ldap_message(&result), "Retrying search on the same server");
                    Ok(PassOutcome::RetrySameServer)
                }
                ErrorDisposition::Reconnect => {
                    warn!(server = %connection.server, result = %format_ldap_message(&result), "Server reported connection failure, reconnecting");
                    Ok(PassOutcome::Reconnect)
                }
                _ => {
                    error!(server = %connection.server, result = %format_ldap_message(&result), "LDAP error during search");
                    Err(self.classifier.result_error(
                        &result,
                        connection.server.host(),
                        connection.server.port(),
                    ))
                }
            },
        }
    }
}

#[async_trait]
impl<T, X, H> SearchStrategy for DefaultSearchStrategy<T, X, H>
where
    T: DirectoryTransport,
    X: EntryTranslator,
    H: ResultsHandler<X::Output>,
{
    #[instrument(skip(self, base, attributes), fields(base = %base))]
    async fn search(
        &mut self,
        base: &Dn,
        filter: &str,
        scope: Scope,
        attributes: &[String],
    ) -> ConnectorResult<()> {
        self.state = SearchState::default();
        let request = self.options.build_request(base, filter, scope, attributes);

        let mut connection = match &self.connection {
            Some(connection) => connection.clone(),
            None => resolve_connection(&self.manager, base, None).await?,
        };
        let mut failures = 0u32;

        loop {
            let attempt = self.state.retry_attempts + 1;
            if !self.options.retry.allows_attempt(attempt) {
                release_connection(connection);
                return Err(ConnectorError::MaxRetriesExceeded {
                    max_retries: self.options.retry.max_attempts.unwrap_or_default(),
                    message: format!("search of {base} did not complete"),
                });
            }
            self.state.retry_attempts = attempt;

            let outcome = match self.run_pass(&request, &mut connection).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    release_connection(connection);
                    return Err(e);
                }
            };

            match outcome {
                PassOutcome::Done => break,
                PassOutcome::RetrySameServer => {
                    self.options.retry.pause(failures).await;
                    failures += 1;
                }
                PassOutcome::Reconnect => {
                    discard_connection(connection).await;
                    self.options.retry.pause(failures).await;
                    failures += 1;
                    connection = resolve_connection(
                        &self.manager,
                        base,
                        self.state.last_referral.as_ref(),
                    )
                    .await?;
                }
                PassOutcome::FollowReferral(referral) => {
                    release_connection(connection);
                    connection = connect_referral(&self.manager, base, &referral).await?;
                }
            }
        }

        release_connection(connection);
        info!(
            entries_found = self.state.entries_found,
            passes = self.state.retry_attempts,
            complete = self.state.complete_result_set,
            "LDAP search completed"
        );
        Ok(())
    }

    fn state(&self) -> &SearchState {
        &self.state
    }
}
