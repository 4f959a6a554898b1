//! Classification of LDAP results and transport failures.
//!
//! The search loop asks the classifier what to do with a failure; the
//! manager uses it to turn protocol errors into [`ConnectorError`] values
//! carrying host and port context.

use ldap3::{LdapError, LdapResult};
use xavyo_connector::error::ConnectorError;

/// LDAP result codes (RFC 4511, section 4.1.9) used by the core.
pub mod result_code {
    pub const SUCCESS: u32 = 0;
    pub const OPERATIONS_ERROR: u32 = 1;
    pub const PROTOCOL_ERROR: u32 = 2;
    pub const TIME_LIMIT_EXCEEDED: u32 = 3;
    pub const SIZE_LIMIT_EXCEEDED: u32 = 4;
    pub const REFERRAL: u32 = 10;
    pub const ADMIN_LIMIT_EXCEEDED: u32 = 11;
    pub const UNAVAILABLE_CRITICAL_EXTENSION: u32 = 12;
    pub const NO_SUCH_ATTRIBUTE: u32 = 16;
    pub const NO_SUCH_OBJECT: u32 = 32;
    pub const INVALID_DN_SYNTAX: u32 = 34;
    pub const INVALID_CREDENTIALS: u32 = 49;
    pub const INSUFFICIENT_ACCESS_RIGHTS: u32 = 50;
    pub const BUSY: u32 = 51;
    pub const UNAVAILABLE: u32 = 52;
    pub const UNWILLING_TO_PERFORM: u32 = 53;
    pub const OTHER: u32 = 80;
    pub const SERVER_DOWN: u32 = 81;
    pub const TIMEOUT: u32 = 85;
    pub const CONNECT_ERROR: u32 = 91;
}

/// Symbolic name of a result code.
pub fn result_code_name(rc: u32) -> &'static str {
    use result_code::*;
    match rc {
        SUCCESS => "success",
        OPERATIONS_ERROR => "operationsError",
        PROTOCOL_ERROR => "protocolError",
        TIME_LIMIT_EXCEEDED => "timeLimitExceeded",
        SIZE_LIMIT_EXCEEDED => "sizeLimitExceeded",
        REFERRAL => "referral",
        ADMIN_LIMIT_EXCEEDED => "adminLimitExceeded",
        UNAVAILABLE_CRITICAL_EXTENSION => "unavailableCriticalExtension",
        NO_SUCH_ATTRIBUTE => "noSuchAttribute",
        NO_SUCH_OBJECT => "noSuchObject",
        INVALID_DN_SYNTAX => "invalidDNSyntax",
        INVALID_CREDENTIALS => "invalidCredentials",
        INSUFFICIENT_ACCESS_RIGHTS => "insufficientAccessRights",
        BUSY => "busy",
        UNAVAILABLE => "unavailable",
        UNWILLING_TO_PERFORM => "unwillingToPerform",
        OTHER => "other",
        SERVER_DOWN => "serverDown",
        TIMEOUT => "timeout",
        CONNECT_ERROR => "connectError",
        _ => "unknown",
    }
}

/// Render a result as `name: diagnostic (code)`.
pub fn format_ldap_message(result: &LdapResult) -> String {
    let name = result_code_name(result.rc);
    if result.text.is_empty() {
        format!("{name} ({})", result.rc)
    } else {
        format!("{name}: {} ({})", result.text, result.rc)
    }
}

/// What the search loop should do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Re-issue the request on the same connection.
    RetrySameServer,
    /// Drop the connection, re-resolve, and re-issue the request.
    Reconnect,
    /// The result is a referral.
    FollowReferral,
    /// Give up.
    Fatal,
}

/// Maps result codes and transport errors to dispositions and errors.
pub trait ErrorClassifier: Send + Sync {
    /// Disposition for a non-success terminal result.
    fn classify_result(&self, result: &LdapResult) -> ErrorDisposition;

    /// Disposition for a transport failure.
    fn classify_transport(&self, error: &LdapError) -> ErrorDisposition;

    /// Convert a non-success result into the uniform error type.
    fn result_error(&self, result: &LdapResult, host: &str, port: u16) -> ConnectorError;

    /// Convert a transport failure into the uniform error type.
    fn transport_error(&self, error: LdapError, host: &str, port: u16) -> ConnectorError;
}

/// Classifier implementing the standard LDAP result-code semantics.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorClassifier;

impl ErrorClassifier for DefaultErrorClassifier {
    fn classify_result(&self, result: &LdapResult) -> ErrorDisposition {
        use result_code::*;
        match result.rc {
            BUSY | UNAVAILABLE => ErrorDisposition::RetrySameServer,
            SERVER_DOWN | CONNECT_ERROR => ErrorDisposition::Reconnect,
            REFERRAL => ErrorDisposition::FollowReferral,
            _ => ErrorDisposition::Fatal,
        }
    }

    fn classify_transport(&self, error: &LdapError) -> ErrorDisposition {
        match error {
            LdapError::Io { .. }
            | LdapError::EndOfStream
            | LdapError::Timeout { .. }
            | LdapError::OpSend { .. }
            | LdapError::ResultRecv { .. } => ErrorDisposition::Reconnect,
            LdapError::LdapResult { result } => self.classify_result(result),
            _ => ErrorDisposition::Fatal,
        }
    }

    fn result_error(&self, result: &LdapResult, host: &str, port: u16) -> ConnectorError {
        use result_code::*;
        let message = format_ldap_message(result);
        match result.rc {
            INVALID_CREDENTIALS => ConnectorError::AuthenticationFailed { message },
            INSUFFICIENT_ACCESS_RIGHTS => ConnectorError::AuthorizationFailed {
                operation: format!("operation on {host}:{port} ({message})"),
            },
            NO_SUCH_OBJECT => ConnectorError::ObjectNotFound {
                identifier: if result.matched.is_empty() {
                    message
                } else {
                    format!("{message}, matched '{}'", result.matched)
                },
            },
            rc => ConnectorError::DirectoryError {
                message: format!("LDAP error from {host}:{port}: {message}"),
                result_code: rc,
            },
        }
    }

    fn transport_error(&self, error: LdapError, host: &str, port: u16) -> ConnectorError {
        match error {
            LdapError::LdapResult { result } => self.result_error(&result, host, port),
            LdapError::Timeout { .. } => ConnectorError::network_with_source(
                format!("timeout talking to {host}:{port}"),
                error,
            ),
            e if self.classify_transport(&e) == ErrorDisposition::Reconnect => {
                ConnectorError::network_with_source(format!("connection to {host}:{port} lost"), e)
            }
            e => ConnectorError::operation_failed_with_source(
                format!("LDAP operation on {host}:{port} failed"),
                e,
            ),
        }
    }
}
