//! Connector Framework error types
//!
//! Error definitions with transient/permanent/configuration classification
//! so retry loops can decide whether another attempt is worthwhile.

use thiserror::Error;

/// Error that can occur during connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    // Connection errors (usually transient)
    /// Failed to establish a connection to the target system.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Network error during communication.
    #[error("network error: {message}")]
    NetworkError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Authentication errors (permanent)
    /// The server rejected the bind for this identity.
    #[error("unable to bind to {host}:{port} as {bind_dn}: {message} ({result_code})")]
    BindFailed {
        host: String,
        port: u16,
        bind_dn: String,
        result_code: u32,
        message: String,
    },

    /// Invalid credentials provided.
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Insufficient permissions for the operation.
    #[error("authorization failed: insufficient permissions for {operation}")]
    AuthorizationFailed { operation: String },

    // Configuration errors (permanent)
    /// Connector configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    // Operation errors
    /// Object not found in the target system.
    #[error("object not found: {identifier}")]
    ObjectNotFound { identifier: String },

    /// The directory answered with a non-success result code.
    #[error("{message}")]
    DirectoryError { message: String, result_code: u32 },

    /// A referral could not be turned into a usable connection.
    #[error("cannot get connection based on referral {referral}")]
    ReferralUnavailable { referral: String },

    /// The operator-configured retry bound was reached.
    #[error("maximum retries ({max_retries}) exceeded: {message}")]
    MaxRetriesExceeded { max_retries: u32, message: String },

    /// Operation failed.
    #[error("operation failed: {message}")]
    OperationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ConnectorError {
    /// Check if this error is transient and the operation should be retried.
    ///
    /// Transient errors are caused by conditions that may resolve themselves,
    /// such as a dropped connection or a server that is briefly unreachable.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::ConnectionFailed { .. }
                | ConnectorError::NetworkError { .. }
        )
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Check if this error points at a configuration problem.
    ///
    /// Configuration errors are never retried and usually need an operator.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ConnectorError::InvalidConfiguration { .. } | ConnectorError::BindFailed { .. }
        )
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectorError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            ConnectorError::NetworkError { .. } => "NETWORK_ERROR",
            ConnectorError::BindFailed { .. } => "BIND_FAILED",
            ConnectorError::AuthenticationFailed { .. } => "AUTH_FAILED",
            ConnectorError::AuthorizationFailed { .. } => "AUTHORIZATION_FAILED",
            ConnectorError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            ConnectorError::ObjectNotFound { .. } => "OBJECT_NOT_FOUND",
            ConnectorError::DirectoryError { .. } => "DIRECTORY_ERROR",
            ConnectorError::ReferralUnavailable { .. } => "REFERRAL_UNAVAILABLE",
            ConnectorError::MaxRetriesExceeded { .. } => "MAX_RETRIES_EXCEEDED",
            ConnectorError::OperationFailed { .. } => "OPERATION_FAILED",
        }
    }

    /// Numeric protocol result code carried by the error, if any.
    pub fn result_code(&self) -> Option<u32> {
        match self {
            ConnectorError::BindFailed { result_code, .. }
            | ConnectorError::DirectoryError { result_code, .. } => Some(*result_code),
            _ => None,
        }
    }

    // Convenience constructors

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        ConnectorError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an operation failed error.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        ConnectorError::OperationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an operation failed error with source.
    pub fn operation_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::OperationFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a network error with source.
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::NetworkError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
