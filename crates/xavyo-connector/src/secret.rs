//! Guarded credentials.
//!
//! A [`GuardedSecret`] never prints its value and only hands it out for the
//! duration of a single closure call. The backing buffer is zeroized when the
//! secret is dropped.

use std::fmt;

use zeroize::Zeroizing;

/// A credential that can only be read through [`GuardedSecret::access`].
#[derive(Clone)]
pub struct GuardedSecret {
    value: Zeroizing<String>,
}

impl GuardedSecret {
    /// Wrap a plain credential. The caller's copy is consumed.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Zeroizing::new(value.into()),
        }
    }

    /// Expose the secret to `f` for the duration of the call.
    ///
    /// Whatever `f` derives from the secret is its own responsibility; values
    /// that must outlive the call should themselves be zeroizing.
    pub fn access<R>(&self, f: impl FnOnce(&str) -> R) -> R {
        f(self.value.as_str())
    }

    /// Whether the secret is the empty string (anonymous bind).
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Debug for GuardedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GuardedSecret(***REDACTED***)")
    }
}

impl From<String> for GuardedSecret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for GuardedSecret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
