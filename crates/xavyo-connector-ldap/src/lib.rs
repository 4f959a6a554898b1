//! # LDAP Connection Manager
//!
//! Connection routing and resilient search for xavyo LDAP provisioning.
//!
//! This crate decides which directory server an operation targeting a DN
//! should go to, keeps at most one bound connection per server, and streams
//! searches to completion across connection loss and referrals.
//!
//! ## Features
//!
//! - DN routing by most specific naming context, with random load balancing
//! - Servers discovered through referrals registered on the fly
//! - Lazy connect and bind, plain / SSL / STARTTLS
//! - Streaming search with reconnect, referral follow and early stop
//! - Partial results on size limit when allowed
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use ldap3::Scope;
//! use xavyo_connector_ldap::{
//!     ConnectionManager, DefaultSearchStrategy, DnSchema, CaseIgnoreSchema, Ldap3Transport,
//!     LdapConfig, PassThroughTranslator, SearchOptions, SearchStrategy,
//! };
//!
//! let config = LdapConfig::new("ldap.example.com")
//!     .with_base_context("dc=example,dc=com")
//!     .with_credentials("cn=admin,dc=example,dc=com", "secret")
//!     .with_starttls();
//!
//! let manager = Arc::new(ConnectionManager::new(config, Ldap3Transport::new())?);
//! let options = SearchOptions::from_config(manager.config());
//! let mut search = DefaultSearchStrategy::new(
//!     Arc::clone(&manager),
//!     options,
//!     PassThroughTranslator,
//!     |entry: ldap3::SearchEntry| {
//!         println!("{}", entry.dn);
//!         true
//!     },
//! );
//!
//! let base = CaseIgnoreSchema.parse_qualified("ou=people,dc=example,dc=com")?;
//! search.search(&base, "(objectClass=person)", Scope::Subtree, &[]).await?;
//! manager.close().await?;
//! ```

pub mod binary;
pub mod classifier;
pub mod config;
pub mod dn;
pub mod ldap_url;
pub mod manager;
pub mod network;
pub mod search;
pub mod server;
pub mod transport;

// Re-exports
pub use binary::BinaryAttributeDetector;
pub use classifier::{DefaultErrorClassifier, ErrorClassifier, ErrorDisposition};
pub use config::{ConnectionSecurity, LdapConfig, ReferralStrategy, ServerConfig};
pub use dn::{CaseIgnoreSchema, Dn, DnError, DnSchema};
pub use ldap_url::{LdapUrl, Referral};
pub use manager::{ConnectionManager, ServerRef};
pub use network::{Ldap3Cursor, Ldap3Session, Ldap3Transport};
pub use search::{
    Connection, CursorGuard, DefaultSearchStrategy, EntryTranslator, PassOutcome,
    PassThroughTranslator, ResultsHandler, SearchOptions, SearchState, SearchStrategy,
};
pub use server::{ServerOrigin, ServerRecord};
pub use transport::{
    BindRequest, DirectorySession, DirectoryTransport, SearchCursor, SearchRequest,
    SearchResponse, TransportSettings,
};
