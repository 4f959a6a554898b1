//! # Connector Framework
//!
//! Shared building blocks for xavyo connectors that talk to external
//! identity systems.
//!
//! ## Crate Organization
//!
//! - [`error`] - Error types with transient/permanent/configuration classification
//! - [`config`] - Configuration trait plus connection and TLS settings
//! - [`resilience`] - Retry bound and exponential backoff
//! - [`secret`] - Credentials exposed only through scoped access
//!
//! ## Example
//!
//! ```
//! use xavyo_connector::prelude::*;
//!
//! let retry = RetryConfig::immediate().with_max_attempts(3);
//! assert!(retry.allows_attempt(3));
//!
//! let secret = GuardedSecret::new("s3cret");
//! assert_eq!(secret.access(|s| s.len()), 6);
//! ```

pub mod config;
pub mod error;
pub mod resilience;
pub mod secret;

/// Prelude module for convenient imports.
///
/// ```
/// use xavyo_connector::prelude::*;
/// ```
pub mod prelude {
    // Error handling
    pub use crate::error::{ConnectorError, ConnectorResult};

    // Configuration
    pub use crate::config::{ConnectionSettings, ConnectorConfig, TlsConfig};

    // Resilience
    pub use crate::resilience::RetryConfig;

    // Credentials
    pub use crate::secret::GuardedSecret;
}
