//! Type-safe user identifier.
//!
//! [`UserCode`] is a newtype wrapper around an opaque string so user
//! identifiers cannot be confused with idempotency references or other
//! string-shaped values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of the user owning a ledger.
///
/// Opaque to the engine: issued by the surrounding application, never
/// reused across users. Used as the partition key for every ledger
/// entry, balance row, and hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserCode(String);

impl UserCode {
    /// Creates a `UserCode` from any string-like value.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the wrapper and returns the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for UserCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserCode {
    fn from(code: String) -> Self {
        Self(code)
    }
}

impl From<&str> for UserCode {
    fn from(code: &str) -> Self {
        Self(code.to_string())
    }
}
