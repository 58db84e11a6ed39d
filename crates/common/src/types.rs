//! Common data types for keylock components.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque value identifying the holder of a lock.
///
/// The token is written as the value stored under the lock name. Two
/// holders that race for the same name must use distinct tokens, otherwise
/// the store cannot tell them apart on release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerToken(String);

impl OwnerToken {
    /// Create a new random owner token (UUIDv4, hyphenated).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The token as written to the store.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OwnerToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for OwnerToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for OwnerToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_distinct() {
        let a = OwnerToken::generate();
        let b = OwnerToken::generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_caller_supplied_token_is_kept_verbatim() {
        let token = OwnerToken::from("worker-7:session-42");
        assert_eq!(token.as_str(), "worker-7:session-42");
        assert_eq!(token.to_string(), "worker-7:session-42");
        assert_eq!(token.into_inner(), "worker-7:session-42");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let token = OwnerToken::from("v1");
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"v1\"");

        let parsed: OwnerToken = serde_json::from_str("\"v2\"").unwrap();
        assert_eq!(parsed, OwnerToken::from("v2"));
    }
}
