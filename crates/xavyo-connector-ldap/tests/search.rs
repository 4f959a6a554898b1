//! Default search strategy integration tests.
//!
//! Each test scripts the directory's responses and checks what the handler
//! saw, which servers were contacted and how the operation was ended.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use ldap3::{Scope, SearchEntry};
use rand::rngs::StdRng;
use rand::SeedableRng;
use xavyo_connector::error::{ConnectorError, ConnectorResult};
use xavyo_connector::resilience::RetryConfig;
use xavyo_connector_ldap::{
    CaseIgnoreSchema, Connection, ConnectionManager, DefaultSearchStrategy, Dn, DnSchema,
    EntryTranslator, LdapConfig, PassThroughTranslator, ReferralStrategy, SearchOptions,
    SearchStrategy,
};

const PEOPLE: &str = "ou=people,dc=example,dc=com";
const DC2_HOST: &str = "dc2.example.com";
const DC2_REFERRAL: &str = "ldap://dc2.example.com/ou=people,dc=example,dc=com";

type Strategy<X = PassThroughTranslator> = DefaultSearchStrategy<MockTransport, X, Collector>;

fn qualified(dn: &str) -> Dn {
    CaseIgnoreSchema.parse_qualified(dn).unwrap()
}

fn setup(config: LdapConfig) -> (MockTransport, Arc<ConnectionManager<MockTransport>>) {
    init_test_logging();
    let transport = MockTransport::new();
    let manager = ConnectionManager::new(config, transport.clone())
        .unwrap()
        .with_rng(StdRng::seed_from_u64(42));
    (transport, Arc::new(manager))
}

fn strategy(
    manager: &Arc<ConnectionManager<MockTransport>>,
    options: SearchOptions,
    collector: &Collector,
) -> Strategy {
    DefaultSearchStrategy::new(
        Arc::clone(manager),
        options,
        PassThroughTranslator,
        collector.clone(),
    )
}

async fn search_people<X>(search: &mut Strategy<X>) -> ConnectorResult<()>
where
    X: EntryTranslator<Output = SearchEntry>,
{
    search
        .search(&qualified(PEOPLE), "(objectClass=person)", Scope::Subtree, &[])
        .await
}

fn person(i: usize) -> String {
    format!("cn=user{i},ou=people,dc=example,dc=com")
}

// =============================================================================
// Streaming
// =============================================================================

/// Every entry reaches the handler in order and the operation ends cleanly.
#[tokio::test]
async fn test_search_delivers_all_entries() {
    let (transport, manager) = setup(sales_config());
    transport.script(DEFAULT_HOST, SearchScript::entries(5));
    let collector = Collector::new();
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector);

    search_people(&mut search).await.unwrap();

    assert_eq!(collector.dns(), (0..5).map(person).collect::<Vec<_>>());
    let state = search.state();
    assert!(state.complete_result_set);
    assert_eq!(state.entries_found, 5);
    assert_eq!(state.retry_attempts, 1);
    assert_eq!(
        transport.searches(),
        vec![(DEFAULT_HOST.to_string(), PEOPLE.to_string())]
    );
    assert!(transport.abandons().is_empty());
    assert!(transport.cancels().is_empty());
}

/// The search goes to the server owning the base DN.
#[tokio::test]
async fn test_search_routes_by_base() {
    let (transport, manager) = setup(sales_config());
    transport.script(SALES_HOST, SearchScript::entries(2));
    let collector = Collector::new();
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector);

    search
        .search(
            &qualified("ou=sales,dc=example,dc=com"),
            "(cn=*)",
            Scope::OneLevel,
            &["cn".to_string()],
        )
        .await
        .unwrap();

    assert_eq!(transport.connects(), vec![SALES_HOST.to_string()]);
    assert_eq!(collector.count(), 2);
}

/// A handler returning false stops delivery and abandons the operation.
#[tokio::test]
async fn test_handler_stops_search_early() {
    let (transport, manager) = setup(sales_config());
    transport.script(DEFAULT_HOST, SearchScript::entries(1000));
    let collector = Collector::stopping_after(500);
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector);

    search_people(&mut search).await.unwrap();

    assert_eq!(collector.count(), 500);
    assert_eq!(search.state().entries_found, 500);
    assert_eq!(transport.nexts(), 500);
    assert_eq!(transport.abandons(), vec![DEFAULT_HOST.to_string()]);
    assert!(transport.cancels().is_empty());
}

/// Closures work as handlers.
#[tokio::test]
async fn test_closure_handler() {
    let (transport, manager) = setup(sales_config());
    transport.script(DEFAULT_HOST, SearchScript::entries(3));
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let mut search = DefaultSearchStrategy::new(
        Arc::clone(&manager),
        SearchOptions::from_config(manager.config()),
        PassThroughTranslator,
        move |_: SearchEntry| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        },
    );

    search
        .search(&qualified(PEOPLE), "(objectClass=*)", Scope::Subtree, &[])
        .await
        .unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

/// References and intermediate responses inside the stream are skipped.
#[tokio::test]
async fn test_unexpected_responses_are_skipped() {
    let (transport, manager) = setup(sales_config());
    transport.script(
        DEFAULT_HOST,
        SearchScript::entries(1)
            .with_step(Step::Reference(vec![DC2_REFERRAL.to_string()]))
            .with_step(Step::Intermediate)
            .with_step(Step::Entry(entry(&person(1)))),
    );
    let collector = Collector::new();
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector);

    search_people(&mut search).await.unwrap();

    assert_eq!(collector.dns(), vec![person(0), person(1)]);
    assert_eq!(transport.connects(), vec![DEFAULT_HOST.to_string()]);
}

/// A stream without a terminal frame counts as complete.
#[tokio::test]
async fn test_missing_terminal_result_is_done() {
    let (transport, manager) = setup(sales_config());
    transport.script(DEFAULT_HOST, SearchScript::entries(2).without_done());
    let collector = Collector::new();
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector);

    search_people(&mut search).await.unwrap();

    assert_eq!(collector.count(), 2);
    assert!(search.state().complete_result_set);
}

/// Each search starts from fresh state.
#[tokio::test]
async fn test_state_resets_between_searches() {
    let (transport, manager) = setup(sales_config().with_allow_partial_results(true));
    transport.script(
        DEFAULT_HOST,
        SearchScript::entries(2).ending_with(ldap_result(4, "")),
    );
    transport.script(DEFAULT_HOST, SearchScript::entries(1));
    let collector = Collector::new();
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector);

    search_people(&mut search).await.unwrap();
    assert!(!search.state().complete_result_set);

    search_people(&mut search).await.unwrap();
    assert!(search.state().complete_result_set);
    assert_eq!(search.state().entries_found, 1);
    assert_eq!(transport.connect_count(DEFAULT_HOST), 1);
}

/// A translation failure aborts the search and cancels the operation.
#[tokio::test]
async fn test_translator_failure_aborts_search() {
    struct RejectUser1;

    impl EntryTranslator for RejectUser1 {
        type Output = SearchEntry;

        fn translate(&self, entry: SearchEntry) -> ConnectorResult<SearchEntry> {
            if entry.dn.starts_with("cn=user1,") {
                return Err(ConnectorError::operation_failed("cannot map user1"));
            }
            Ok(entry)
        }
    }

    let (transport, manager) = setup(sales_config());
    transport.script(DEFAULT_HOST, SearchScript::entries(5));
    let collector = Collector::new();
    let mut search = DefaultSearchStrategy::new(
        Arc::clone(&manager),
        SearchOptions::from_config(manager.config()),
        RejectUser1,
        collector.clone(),
    );

    let err = search_people(&mut search).await.unwrap_err();

    assert!(err.to_string().contains("cannot map user1"));
    assert_eq!(collector.dns(), vec![person(0)]);
    assert_eq!(transport.cancels(), vec![DEFAULT_HOST.to_string()]);
}

/// An explicit starting connection overrides routing.
#[tokio::test]
async fn test_explicit_connection_overrides_routing() {
    let (transport, manager) = setup(sales_config());
    transport.script(SALES_HOST, SearchScript::entries(2));
    let sales_dn = qualified("ou=sales,dc=example,dc=com");
    let connection = Connection {
        server: manager.select_server(&sales_dn).await,
        session: manager.get_connection(&sales_dn).await.unwrap(),
    };
    let collector = Collector::new();
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector)
        .with_connection(connection);

    search_people(&mut search).await.unwrap();

    assert_eq!(
        transport.searches(),
        vec![(SALES_HOST.to_string(), PEOPLE.to_string())]
    );
    assert_eq!(collector.count(), 2);
}

// =============================================================================
// Size limits
// =============================================================================

/// A size-limited search ends with partial results when allowed.
#[tokio::test]
async fn test_size_limit_with_partial_results() {
    let (transport, manager) = setup(sales_config());
    transport.script(
        DEFAULT_HOST,
        SearchScript::entries(3).ending_with(ldap_result(4, "")),
    );
    let collector = Collector::new();
    let options = SearchOptions::from_config(manager.config())
        .with_size_limit(3)
        .with_allow_partial_results(true);
    let mut search = strategy(&manager, options, &collector);

    search_people(&mut search).await.unwrap();

    assert_eq!(collector.count(), 3);
    assert!(!search.state().complete_result_set);
}

/// Without partial results a size limit is an error.
#[tokio::test]
async fn test_size_limit_without_partial_results() {
    let (transport, manager) = setup(sales_config());
    transport.script(
        DEFAULT_HOST,
        SearchScript::entries(3).ending_with(ldap_result(4, "")),
    );
    let collector = Collector::new();
    let options = SearchOptions::from_config(manager.config()).with_size_limit(3);
    let mut search = strategy(&manager, options, &collector);

    let err = search_people(&mut search).await.unwrap_err();

    assert!(matches!(err, ConnectorError::DirectoryError { .. }));
    assert_eq!(err.result_code(), Some(4));
    assert!(err.to_string().contains("sizeLimitExceeded"));
    assert_eq!(collector.count(), 3);
}

// =============================================================================
// Referrals
// =============================================================================

/// Ignored referrals end the search without contacting the referred server.
#[tokio::test]
async fn test_referral_ignored() {
    let (transport, manager) = setup(sales_config());
    transport.script(
        DEFAULT_HOST,
        SearchScript::entries(2).ending_with(referral_result(&[DC2_REFERRAL])),
    );
    let collector = Collector::new();
    let options = SearchOptions::from_config(manager.config())
        .with_referral_strategy(ReferralStrategy::Ignore);
    let mut search = strategy(&manager, options, &collector);

    search_people(&mut search).await.unwrap();

    assert_eq!(collector.count(), 2);
    assert_eq!(transport.connects(), vec![DEFAULT_HOST.to_string()]);
    let referral = search.state().last_referral.clone().unwrap();
    assert_eq!(referral.urls(), [DC2_REFERRAL.to_string()]);
}

/// Followed referrals continue the search on the referred server.
#[tokio::test]
async fn test_referral_followed() {
    let (transport, manager) = setup(sales_config());
    transport.script(
        DEFAULT_HOST,
        SearchScript::entries(2).ending_with(referral_result(&[DC2_REFERRAL])),
    );
    transport.script(DC2_HOST, SearchScript::entries_from(2, 3));
    let collector = Collector::new();
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector);

    search_people(&mut search).await.unwrap();

    assert_eq!(collector.dns(), (0..5).map(person).collect::<Vec<_>>());
    assert_eq!(
        transport.searches(),
        vec![
            (DEFAULT_HOST.to_string(), PEOPLE.to_string()),
            (DC2_HOST.to_string(), PEOPLE.to_string()),
        ]
    );
    assert_eq!(search.state().retry_attempts, 2);
    assert_eq!(manager.servers().await.len(), 3);
}

/// With the throw strategy a referral is an error.
#[tokio::test]
async fn test_referral_thrown() {
    let (transport, manager) = setup(sales_config());
    transport.script(
        DEFAULT_HOST,
        SearchScript::entries(1).ending_with(referral_result(&[DC2_REFERRAL])),
    );
    let collector = Collector::new();
    let options = SearchOptions::from_config(manager.config())
        .with_referral_strategy(ReferralStrategy::Throw);
    let mut search = strategy(&manager, options, &collector);

    let err = search_people(&mut search).await.unwrap_err();

    assert_eq!(err.result_code(), Some(10));
    assert_eq!(transport.connects(), vec![DEFAULT_HOST.to_string()]);
}

/// A referral whose only URL is unusable fails the search.
#[tokio::test]
async fn test_unusable_referral_fails_search() {
    let (transport, manager) = setup(sales_config());
    transport.script(
        DEFAULT_HOST,
        SearchScript::entries(0).ending_with(referral_result(&["http://dc2.example.com/"])),
    );
    let collector = Collector::new();
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector);

    let err = search_people(&mut search).await.unwrap_err();

    assert!(matches!(err, ConnectorError::ReferralUnavailable { .. }));
}

// =============================================================================
// Failures and retries
// =============================================================================

/// After a mid-stream disconnect the request is re-issued on a fresh
/// connection and entries already delivered are delivered again.
#[tokio::test]
async fn test_disconnect_mid_stream_redelivers_entries() {
    let (transport, manager) = setup(sales_config());
    transport.script(
        DEFAULT_HOST,
        SearchScript::entries(3).with_step(Step::Disconnect),
    );
    transport.script(DEFAULT_HOST, SearchScript::entries(3));
    let collector = Collector::new();
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector);

    search_people(&mut search).await.unwrap();

    let expected: Vec<String> = (0..3).chain(0..3).map(person).collect();
    assert_eq!(collector.dns(), expected);
    assert_eq!(search.state().entries_found, 6);
    assert_eq!(search.state().retry_attempts, 2);
    assert_eq!(transport.connect_count(DEFAULT_HOST), 2);
    assert_eq!(transport.closes(), vec![DEFAULT_HOST.to_string()]);
    assert!(manager.is_alive().await);
}

/// A reconnect after following a referral returns to the referred server.
#[tokio::test]
async fn test_reconnect_after_referral_targets_referred_server() {
    let (transport, manager) = setup(sales_config());
    transport.script(
        DEFAULT_HOST,
        SearchScript::entries(1).ending_with(referral_result(&[DC2_REFERRAL])),
    );
    transport.script(
        DC2_HOST,
        SearchScript::entries_from(1, 1).with_step(Step::Disconnect),
    );
    transport.script(DC2_HOST, SearchScript::entries_from(1, 2));
    let collector = Collector::new();
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector);

    search_people(&mut search).await.unwrap();

    assert_eq!(collector.dns(), vec![person(0), person(1), person(1), person(2)]);
    assert_eq!(transport.connect_count(DEFAULT_HOST), 1);
    assert_eq!(transport.connect_count(DC2_HOST), 2);
}

/// When the server stays down the reconnect failure is reported.
#[tokio::test]
async fn test_failed_reconnect_is_reported() {
    let (transport, manager) = setup(sales_config());
    transport.script(
        DEFAULT_HOST,
        SearchScript::entries(2).with_step(Step::DisconnectAndGoDown),
    );
    let collector = Collector::new();
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector);

    let err = search_people(&mut search).await.unwrap_err();

    assert!(err.is_transient());
    assert!(matches!(err, ConnectorError::ConnectionFailed { .. }));
    assert_eq!(collector.count(), 2);
}

/// A terminal server-down result reconnects and re-issues the request.
#[tokio::test]
async fn test_server_down_result_reconnects() {
    let (transport, manager) = setup(sales_config());
    transport.script(
        DEFAULT_HOST,
        SearchScript::entries(1).ending_with(ldap_result(81, "down")),
    );
    transport.script(DEFAULT_HOST, SearchScript::entries(2));
    let collector = Collector::new();
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector);

    search_people(&mut search).await.unwrap();

    assert_eq!(collector.dns(), vec![person(0), person(0), person(1)]);
    assert_eq!(search.state().retry_attempts, 2);
    assert_eq!(transport.connect_count(DEFAULT_HOST), 2);
    assert_eq!(transport.closes(), vec![DEFAULT_HOST.to_string()]);
}

/// A busy server is retried on the same connection.
#[tokio::test]
async fn test_busy_server_retried_on_same_connection() {
    let (transport, manager) = setup(sales_config());
    transport.script(
        DEFAULT_HOST,
        SearchScript::entries(0).ending_with(ldap_result(51, "busy")),
    );
    transport.script(DEFAULT_HOST, SearchScript::entries(2));
    let collector = Collector::new();
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector);

    search_people(&mut search).await.unwrap();

    assert_eq!(collector.count(), 2);
    assert_eq!(search.state().retry_attempts, 2);
    assert_eq!(transport.connect_count(DEFAULT_HOST), 1);
    assert_eq!(transport.searches().len(), 2);
}

/// A configured attempt bound ends a search that keeps failing.
#[tokio::test]
async fn test_retry_bound_exceeded() {
    let config = sales_config().with_retry(RetryConfig::immediate().with_max_attempts(2));
    let (transport, manager) = setup(config);
    for _ in 0..3 {
        transport.script(
            DEFAULT_HOST,
            SearchScript::entries(0).ending_with(ldap_result(52, "unavailable")),
        );
    }
    let collector = Collector::new();
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector);

    let err = search_people(&mut search).await.unwrap_err();

    assert!(matches!(
        err,
        ConnectorError::MaxRetriesExceeded { max_retries: 2, .. }
    ));
    assert_eq!(transport.searches().len(), 2);
}

/// Other result codes are fatal; the connection stays open for reuse.
#[tokio::test]
async fn test_fatal_result_keeps_connection() {
    let (transport, manager) = setup(sales_config());
    transport.script(
        DEFAULT_HOST,
        SearchScript::entries(1).ending_with(ldap_result(53, "no searching today")),
    );
    let collector = Collector::new();
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector);

    let err = search_people(&mut search).await.unwrap_err();

    assert_eq!(err.result_code(), Some(53));
    assert!(err.to_string().contains("unwillingToPerform: no searching today (53)"));
    assert!(manager.is_alive().await);
    assert!(transport.closes().is_empty());
}

/// Missing base objects map to not-found.
#[tokio::test]
async fn test_no_such_object() {
    let (transport, manager) = setup(sales_config());
    transport.script(
        DEFAULT_HOST,
        SearchScript::entries(0).ending_with(ldap_result(32, "")),
    );
    let collector = Collector::new();
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector);

    let err = search_people(&mut search).await.unwrap_err();

    assert!(matches!(err, ConnectorError::ObjectNotFound { .. }));
}

/// Bind failures surface before any search is issued.
#[tokio::test]
async fn test_bind_failure_prevents_search() {
    let (transport, manager) = setup(sales_config());
    transport.bind_result(DEFAULT_HOST, 49);
    let collector = Collector::new();
    let mut search = strategy(&manager, SearchOptions::from_config(manager.config()), &collector);

    let err = search_people(&mut search).await.unwrap_err();

    assert!(matches!(
        err,
        ConnectorError::BindFailed {
            result_code: 49,
            ..
        }
    ));
    assert!(transport.searches().is_empty());
}
