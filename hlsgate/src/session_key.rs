//! Content-addressable session keys.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::params::CanonicalParameters;

/// Hex characters kept from the SHA-256 digest (96 bits).
pub const SESSION_KEY_LEN: usize = 24;

/// Stable identifier for one canonical parameter set.
///
/// Also used verbatim as the session's directory name, so anything parsed
/// from outside must pass [`FromStr`] validation first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionKey(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid session key {0:?}")]
pub struct InvalidSessionKey(pub String);

impl SessionKey {
    /// Truncated SHA-256 of the canonical serialization.
    pub fn derive(params: &CanonicalParameters) -> Self {
        let digest = Sha256::digest(params.canonical_json().as_bytes());
        let mut encoded = hex::encode(digest);
        encoded.truncate(SESSION_KEY_LEN);
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionKey {
    type Err = InvalidSessionKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == SESSION_KEY_LEN
            && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidSessionKey(s.to_string()))
        }
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
