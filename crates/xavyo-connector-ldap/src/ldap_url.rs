//! LDAP URLs (RFC 4516) and referrals.

use std::fmt;

use ldap3::LdapResult;
use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::{Host, Url};

use crate::config::ConnectionSecurity;
use crate::dn::{Dn, DnError};

/// Error raised for a malformed LDAP URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid LDAP URL '{url}': {reason}")]
pub struct LdapUrlError {
    pub url: String,
    pub reason: String,
}

/// A parsed `ldap://` or `ldaps://` URL.
///
/// Only the parts used for routing are kept: scheme, host, port and base DN.
/// Attribute, scope and filter extensions are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapUrl {
    raw: String,
    secure: bool,
    host: String,
    port: u16,
    base_dn: String,
}

impl LdapUrl {
    /// Parse an LDAP URL.
    pub fn parse(input: &str) -> Result<Self, LdapUrlError> {
        let err = |reason: String| LdapUrlError {
            url: input.to_string(),
            reason,
        };

        let url = Url::parse(input.trim()).map_err(|e| err(e.to_string()))?;

        let secure = match url.scheme() {
            "ldap" => false,
            "ldaps" => true,
            other => return Err(err(format!("unsupported scheme '{other}'"))),
        };

        let host = match url.host() {
            Some(Host::Domain(d)) if !d.is_empty() => d.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(err("missing host".to_string())),
        };

        let security = if secure {
            ConnectionSecurity::Ssl
        } else {
            ConnectionSecurity::None
        };
        let port = url.port().unwrap_or_else(|| security.default_port());

        let encoded_dn = url.path().trim_start_matches('/');
        let base_dn = percent_decode_str(encoded_dn)
            .decode_utf8()
            .map_err(|e| err(format!("base DN is not valid UTF-8: {e}")))?
            .into_owned();

        Ok(Self {
            raw: input.trim().to_string(),
            secure,
            host,
            port,
            base_dn,
        })
    }

    /// Whether the scheme is `ldaps`.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, defaulted from the scheme when absent.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Percent-decoded base DN. Empty when the URL names no DN.
    pub fn base_dn(&self) -> &str {
        &self.base_dn
    }

    /// Parse the base DN, or `None` when the URL names no DN.
    pub fn dn(&self) -> Result<Option<Dn>, DnError> {
        if self.base_dn.is_empty() {
            return Ok(None);
        }
        Dn::parse(&self.base_dn).map(Some)
    }

    /// The URL as given.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for LdapUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Candidate URLs returned by a server in place of a result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Referral {
    urls: Vec<String>,
}

impl Referral {
    /// Build a referral from a list of URLs.
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    /// Extract the referral URLs carried by a terminal result.
    pub fn from_result(result: &LdapResult) -> Self {
        Self::new(result.refs.iter().cloned())
    }

    /// The candidate URLs in server order.
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Whether the referral carries no URL at all.
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

impl fmt::Display for Referral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.urls.join(", "))
    }
}
