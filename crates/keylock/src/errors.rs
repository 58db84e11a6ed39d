//! keylock error types.
//!
//! Contention is not an error: a lock held by someone else, or a release by a
//! caller that no longer owns the lock, is reported as `Ok(false)`. The
//! variants here cover the cases where the caller cannot know the lock state.

use thiserror::Error;

/// keylock error type.
#[derive(Debug, Error)]
pub enum KeylockError {
    /// Transport or store-level failure, carried verbatim from the client.
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    /// The store answered with a reply shape the operation does not accept.
    ///
    /// Never coerced into "not owner": a malformed reply usually means a
    /// script or protocol mismatch that a lock miss would hide.
    #[error("Unexpected reply to {operation}: {reply}")]
    UnexpectedReply {
        operation: &'static str,
        reply: String,
    },

    /// Lease too short to be expressed as a store expiry.
    #[error("Invalid lease: {0}")]
    InvalidLease(String),
}

impl KeylockError {
    /// Whether the store itself failed (as opposed to a malformed exchange).
    pub fn is_store_failure(&self) -> bool {
        matches!(self, KeylockError::Store(_))
    }
}
