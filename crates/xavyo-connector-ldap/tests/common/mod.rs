//! Common test utilities for xavyo-connector-ldap integration tests.
//!
//! Provides a scripted in-memory transport that records every connect,
//! bind, search, cursor advance, abandon and close, plus a few builders for
//! configurations and entries.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once};

use async_trait::async_trait;
use ldap3::{LdapError, LdapResult, SearchEntry};
use xavyo_connector::resilience::RetryConfig;
use xavyo_connector_ldap::{
    BindRequest, DirectorySession, DirectoryTransport, LdapConfig, ResultsHandler, SearchCursor,
    SearchRequest, SearchResponse, ServerConfig, TransportSettings,
};

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

pub const DEFAULT_HOST: &str = "ldap.example.com";
pub const SALES_HOST: &str = "sales.example.com";

/// Default server for `dc=example,dc=com` plus a sales server for
/// `ou=sales,dc=example,dc=com`, retrying without delay.
pub fn sales_config() -> LdapConfig {
    LdapConfig::new(DEFAULT_HOST)
        .with_base_context("dc=example,dc=com")
        .with_credentials("cn=admin,dc=example,dc=com", "secret")
        .with_server(ServerConfig::new(SALES_HOST).with_base_context("ou=sales,dc=example,dc=com"))
        .with_retry(RetryConfig::immediate())
}

/// A result frame with the given code.
pub fn ldap_result(rc: u32, text: &str) -> LdapResult {
    LdapResult {
        rc,
        matched: String::new(),
        text: text.to_string(),
        refs: Vec::new(),
        ctrls: Vec::new(),
    }
}

/// A referral result frame.
pub fn referral_result(urls: &[&str]) -> LdapResult {
    LdapResult {
        refs: urls.iter().map(|u| (*u).to_string()).collect(),
        ..ldap_result(10, "")
    }
}

/// An entry with a `cn` attribute.
pub fn entry(dn: &str) -> SearchEntry {
    let cn = dn
        .split(',')
        .next()
        .and_then(|rdn| rdn.split_once('='))
        .map(|(_, value)| value.to_string())
        .unwrap_or_default();
    SearchEntry {
        dn: dn.to_string(),
        attrs: HashMap::from([("cn".to_string(), vec![cn])]),
        bin_attrs: HashMap::new(),
    }
}

/// One scripted cursor step.
#[derive(Debug, Clone)]
pub enum Step {
    Entry(SearchEntry),
    Reference(Vec<String>),
    Intermediate,
    /// The connection drops while advancing.
    Disconnect,
    /// The connection drops and the host refuses further connects.
    DisconnectAndGoDown,
}

/// What one search on a host produces.
#[derive(Debug, Clone)]
pub struct SearchScript {
    steps: Vec<Step>,
    done: Option<LdapResult>,
}

impl SearchScript {
    /// `count` entries under `ou=people,dc=example,dc=com`, then success.
    pub fn entries(count: usize) -> Self {
        Self::entries_from(0, count)
    }

    /// Entries numbered `start..start + count`, then success.
    pub fn entries_from(start: usize, count: usize) -> Self {
        let steps = (start..start + count)
            .map(|i| Step::Entry(entry(&format!("cn=user{i},ou=people,dc=example,dc=com"))))
            .collect();
        Self {
            steps,
            done: Some(ldap_result(0, "")),
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Replace the terminal frame.
    pub fn ending_with(mut self, result: LdapResult) -> Self {
        self.done = Some(result);
        self
    }

    /// End without a terminal frame.
    pub fn without_done(mut self) -> Self {
        self.done = None;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectBehavior {
    Decline,
    Refuse,
}

#[derive(Debug, Default)]
struct MockState {
    connect_behavior: HashMap<String, ConnectBehavior>,
    bind_codes: HashMap<String, u32>,
    close_failures: HashSet<String>,
    scripts: HashMap<String, VecDeque<SearchScript>>,
    connects: Vec<String>,
    binds: Vec<(String, String)>,
    searches: Vec<(String, String)>,
    closes: Vec<String>,
    abandons: Vec<String>,
    cancels: Vec<String>,
    nexts: usize,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap()
}

fn connection_reset() -> LdapError {
    LdapError::Io {
        source: io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer"),
    }
}

/// Scripted transport. Clones share state.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects to `host` return "not connected" without an error.
    pub fn decline_connect(&self, host: &str) {
        lock(&self.state)
            .connect_behavior
            .insert(host.to_string(), ConnectBehavior::Decline);
    }

    /// Connects to `host` fail with a transport error.
    pub fn refuse_connect(&self, host: &str) {
        lock(&self.state)
            .connect_behavior
            .insert(host.to_string(), ConnectBehavior::Refuse);
    }

    /// Binds against `host` answer with `rc`.
    pub fn bind_result(&self, host: &str, rc: u32) {
        lock(&self.state).bind_codes.insert(host.to_string(), rc);
    }

    /// Closing sessions on `host` fails.
    pub fn fail_close(&self, host: &str) {
        lock(&self.state).close_failures.insert(host.to_string());
    }

    /// Queue the response script for the next search on `host`.
    pub fn script(&self, host: &str, script: SearchScript) {
        lock(&self.state)
            .scripts
            .entry(host.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn connects(&self) -> Vec<String> {
        lock(&self.state).connects.clone()
    }

    pub fn connect_count(&self, host: &str) -> usize {
        lock(&self.state).connects.iter().filter(|h| *h == host).count()
    }

    pub fn binds(&self) -> Vec<(String, String)> {
        lock(&self.state).binds.clone()
    }

    /// `(host, base)` of every search issued.
    pub fn searches(&self) -> Vec<(String, String)> {
        lock(&self.state).searches.clone()
    }

    pub fn closes(&self) -> Vec<String> {
        lock(&self.state).closes.clone()
    }

    pub fn abandons(&self) -> Vec<String> {
        lock(&self.state).abandons.clone()
    }

    pub fn cancels(&self) -> Vec<String> {
        lock(&self.state).cancels.clone()
    }

    /// Number of cursor advances across all searches.
    pub fn nexts(&self) -> usize {
        lock(&self.state).nexts
    }
}

#[async_trait]
impl DirectoryTransport for MockTransport {
    type Session = MockSession;

    async fn connect(&self, settings: &TransportSettings) -> Result<Option<MockSession>, LdapError> {
        let mut state = lock(&self.state);
        state.connects.push(settings.host.clone());

        match state.connect_behavior.get(&settings.host) {
            Some(ConnectBehavior::Decline) => Ok(None),
            Some(ConnectBehavior::Refuse) => Err(LdapError::Io {
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
            }),
            None => Ok(Some(MockSession {
                host: settings.host.clone(),
                connected: Arc::new(AtomicBool::new(true)),
                state: Arc::clone(&self.state),
            })),
        }
    }
}

/// Session handed out by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockSession {
    host: String,
    connected: Arc<AtomicBool>,
    state: Arc<Mutex<MockState>>,
}

impl MockSession {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Simulate the server dropping the connection.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl DirectorySession for MockSession {
    type Cursor = MockCursor;

    async fn bind(&mut self, request: &BindRequest) -> Result<LdapResult, LdapError> {
        let mut state = lock(&self.state);
        state.binds.push((self.host.clone(), request.dn.clone()));
        let rc = state.bind_codes.get(&self.host).copied().unwrap_or(0);
        let text = if rc == 49 { "invalid credentials" } else { "" };
        Ok(ldap_result(rc, text))
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<MockCursor, LdapError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(connection_reset());
        }
        let mut state = lock(&self.state);
        state.searches.push((self.host.clone(), request.base.clone()));
        let script = state
            .scripts
            .get_mut(&self.host)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| SearchScript::entries(0));

        Ok(MockCursor {
            host: self.host.clone(),
            steps: script.steps.into(),
            done_result: script.done,
            exhausted: false,
            done: false,
            connected: Arc::clone(&self.connected),
            state: Arc::clone(&self.state),
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> Result<(), LdapError> {
        self.connected.store(false, Ordering::SeqCst);
        let mut state = lock(&self.state);
        state.closes.push(self.host.clone());
        if state.close_failures.contains(&self.host) {
            return Err(LdapError::Io {
                source: io::Error::new(io::ErrorKind::BrokenPipe, "unbind failed"),
            });
        }
        Ok(())
    }
}

/// Cursor replaying a [`SearchScript`].
pub struct MockCursor {
    host: String,
    steps: VecDeque<Step>,
    done_result: Option<LdapResult>,
    exhausted: bool,
    done: bool,
    connected: Arc<AtomicBool>,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl SearchCursor for MockCursor {
    async fn next(&mut self) -> Result<Option<SearchResponse>, LdapError> {
        let mut state = lock(&self.state);
        state.nexts += 1;

        match self.steps.pop_front() {
            None => {
                self.exhausted = true;
                Ok(None)
            }
            Some(Step::Entry(entry)) => Ok(Some(SearchResponse::Entry(entry))),
            Some(Step::Reference(urls)) => Ok(Some(SearchResponse::Reference(urls))),
            Some(Step::Intermediate) => Ok(Some(SearchResponse::Intermediate)),
            Some(Step::Disconnect) => {
                self.connected.store(false, Ordering::SeqCst);
                self.done = true;
                Err(connection_reset())
            }
            Some(Step::DisconnectAndGoDown) => {
                self.connected.store(false, Ordering::SeqCst);
                self.done = true;
                state
                    .connect_behavior
                    .insert(self.host.clone(), ConnectBehavior::Refuse);
                Err(connection_reset())
            }
        }
    }

    async fn search_done(&mut self) -> Option<LdapResult> {
        if !self.exhausted || self.done {
            return None;
        }
        self.done = true;
        self.done_result.take()
    }

    fn is_done(&self) -> bool {
        self.done
    }

    async fn abandon(&mut self) -> Result<(), LdapError> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        lock(&self.state).abandons.push(self.host.clone());
        Ok(())
    }

    fn cancel(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        lock(&self.state).cancels.push(self.host.clone());
    }
}

/// Collects entry DNs and optionally stops after a fixed number.
#[derive(Clone, Default)]
pub struct Collector {
    dns: Arc<Mutex<Vec<String>>>,
    stop_after: Option<usize>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stopping_after(count: usize) -> Self {
        Self {
            stop_after: Some(count),
            ..Self::default()
        }
    }

    pub fn dns(&self) -> Vec<String> {
        self.dns.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.dns.lock().unwrap().len()
    }
}

impl ResultsHandler<SearchEntry> for Collector {
    fn handle(&mut self, entry: SearchEntry) -> bool {
        let mut dns = self.dns.lock().unwrap();
        dns.push(entry.dn);
        self.stop_after.map_or(true, |limit| dns.len() < limit)
    }
}
