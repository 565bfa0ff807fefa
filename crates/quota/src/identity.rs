//! Validation of the opaque client ids issued to anonymous callers.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::QuotaError;

/// Shortest accepted client id.
pub const MIN_CLIENT_ID_LEN: usize = 8;

/// Longest accepted client id.
pub const MAX_CLIENT_ID_LEN: usize = 50;

/// A validated client id: 8 to 50 characters out of `[A-Za-z0-9_-]`.
///
/// The only way to obtain one is through [`ClientId::parse`] (or its
/// `FromStr`/`TryFrom`/`Deserialize` equivalents), so every storage call is
/// guaranteed to receive a well-formed id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId(String);

impl ClientId {
    /// Returns whether `id` has the shape of a client id.
    pub fn is_valid(id: &str) -> bool {
        (MIN_CLIENT_ID_LEN..=MAX_CLIENT_ID_LEN).contains(&id.len())
            && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    }

    pub fn parse(id: &str) -> Result<Self, QuotaError> {
        if Self::is_valid(id) {
            Ok(Self(id.to_owned()))
        } else {
            Err(QuotaError::InvalidIdentity(id.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex digest of the id, for logs and spans.
    pub(crate) fn hashed(&self) -> String {
        format!("{:x}", md5::compute(self.0.as_bytes()))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ClientId {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ClientId {
    type Error = QuotaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(QuotaError::InvalidIdentity(value))
        }
    }
}

impl From<ClientId> for String {
    fn from(id: ClientId) -> Self {
        id.0
    }
}
