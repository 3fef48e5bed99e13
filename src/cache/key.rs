//! Cache key validation
//!
//! Keys issued by the cache are lowercase hex SHA-256 digests. Lookups accept
//! any string in the URL-safe identifier alphabet so a well-formed but unknown
//! key resolves to a plain miss:
//! - 1-128 characters
//! - ASCII letters, digits, `-` and `_`
//!
//! Anything else is rejected before the key is used to build a filename.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::LazyLock;

/// Longest key accepted on the lookup path
pub const KEY_MAX_LEN: usize = 128;

/// Validation errors for cache keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Key is the empty string
    Empty,
    /// Key is longer than `KEY_MAX_LEN`
    TooLong,
    /// Key contains a character outside the key alphabet
    InvalidCharacter,
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::Empty => write!(f, "cache key is empty"),
            KeyError::TooLong => write!(f, "cache key exceeds {} characters", KEY_MAX_LEN),
            KeyError::InvalidCharacter => {
                write!(f, "cache key may only contain ASCII letters, digits, '-' and '_'")
            }
        }
    }
}

impl std::error::Error for KeyError {}

static KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

/// Validate a cache key taken from untrusted input.
///
/// Returns the key unchanged on success. A valid key can never name a
/// directory component: it contains no `/`, `\`, or `.`.
pub fn validate_key(key: &str) -> Result<&str, KeyError> {
    if key.is_empty() {
        return Err(KeyError::Empty);
    }
    if key.len() > KEY_MAX_LEN {
        return Err(KeyError::TooLong);
    }
    if !KEY_REGEX.is_match(key) {
        return Err(KeyError::InvalidCharacter);
    }
    Ok(key)
}

/// Compute the content-addressed key for a blob
pub(crate) fn compute_key(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
