//! Lease-based distributed lock.
//!
//! The lock keeps no state in process. The store is the single arbiter:
//!
//! - `acquire` is one conditional write, `SET name owner PX lease NX`
//! - `release` and `extend` run owner-checked Lua scripts, so a holder whose
//!   lease expired cannot touch the next holder's lock
//!
//! Every lock entry is written with an expiry; a crashed holder's lock frees
//! itself when the lease runs out.
//!
//! # Usage
//!
//! ```rust,ignore
//! let lock = LeaseLock::new();
//! let owner = OwnerToken::generate();
//!
//! if lock.acquire(&mut conn, "jobs:nightly", &owner, Duration::from_secs(30)).await? {
//!     // ... critical section ...
//!     lock.release(&mut conn, "jobs:nightly", &owner).await?;
//! }
//! ```

use crate::errors::KeylockError;
use crate::script::{lua_scripts, Script};
use crate::store::{Reply, StoreConnection};
use common::types::OwnerToken;
use serde::{Serialize, Serializer};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Distributed lock over a remote store.
///
/// Holds only the owner-checked script descriptors. Cheap to clone; share
/// one instance per process.
#[derive(Debug, Clone)]
pub struct LeaseLock {
    release_script: Script,
    extend_script: Script,
}

/// Diagnostic snapshot of a lock name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStatus {
    pub name: String,
    /// Owner token currently stored, if any.
    pub holder: Option<String>,
    /// Remaining lease. `None` when the key is missing or has no expiry.
    #[serde(rename = "ttl_ms", serialize_with = "serialize_millis")]
    pub ttl: Option<Duration>,
}

fn serialize_millis<S: Serializer>(
    ttl: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match ttl {
        Some(ttl) => {
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
            serializer.serialize_some(&millis)
        }
        None => serializer.serialize_none(),
    }
}

impl Default for LeaseLock {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseLock {
    pub fn new() -> Self {
        Self {
            release_script: Script::new(1, lua_scripts::COMPARE_AND_DELETE),
            extend_script: Script::new(1, lua_scripts::COMPARE_AND_EXTEND),
        }
    }

    /// Compare-and-delete script used by [`LeaseLock::release`].
    pub fn release_script(&self) -> &Script {
        &self.release_script
    }

    /// Compare-and-extend script used by [`LeaseLock::extend`].
    pub fn extend_script(&self) -> &Script {
        &self.extend_script
    }

    /// Try once to take `name` for `owner` with the given lease.
    ///
    /// Returns `Ok(false)` when another holder has the lock. Never retries;
    /// callers that want to wait loop with their own backoff.
    ///
    /// # Errors
    ///
    /// - `KeylockError::InvalidLease` if `lease` is under one millisecond
    /// - `KeylockError::Store` for transport or store failures
    /// - `KeylockError::UnexpectedReply` if the store answers neither `OK` nor nil
    #[instrument(skip_all, fields(lock = %name))]
    pub async fn acquire<C>(
        &self,
        conn: &mut C,
        name: &str,
        owner: &OwnerToken,
        lease: Duration,
    ) -> Result<bool, KeylockError>
    where
        C: StoreConnection + ?Sized,
    {
        let lease_ms = lease_millis(lease)?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(name)
            .arg(owner.as_str())
            .arg("PX")
            .arg(lease_ms)
            .arg("NX");

        let value = conn.execute(&cmd).await.map_err(|e| {
            warn!(
                target: "keylock.lock",
                error = %e,
                lock = %name,
                "Failed to acquire lock"
            );
            e
        })?;

        let acquired = interpret_set_reply(Reply::from(value))?;
        debug!(
            target: "keylock.lock",
            lock = %name,
            acquired,
            lease_ms,
            "Acquire attempted"
        );
        Ok(acquired)
    }

    /// Release `name` if `owner` still holds it.
    ///
    /// Returns `Ok(false)` when the caller is not the current holder (lease
    /// expired and reassigned, or never acquired). The key is left untouched.
    ///
    /// # Errors
    ///
    /// - `KeylockError::Store` for transport or store failures
    /// - `KeylockError::UnexpectedReply` if the script result is not 0 or 1
    #[instrument(skip_all, fields(lock = %name))]
    pub async fn release<C>(
        &self,
        conn: &mut C,
        name: &str,
        owner: &OwnerToken,
    ) -> Result<bool, KeylockError>
    where
        C: StoreConnection + ?Sized,
    {
        let reply = self
            .release_script
            .invoke(conn, (name, owner.as_str()))
            .await
            .map_err(|e| {
                warn!(
                    target: "keylock.lock",
                    error = %e,
                    lock = %name,
                    "Failed to release lock"
                );
                e
            })?;

        let released = interpret_owner_check(reply, "release")?;
        debug!(
            target: "keylock.lock",
            lock = %name,
            released,
            "Release attempted"
        );
        Ok(released)
    }

    /// Reset the lease on `name` if `owner` still holds it.
    ///
    /// # Errors
    ///
    /// Same as [`LeaseLock::release`], plus `KeylockError::InvalidLease`.
    #[instrument(skip_all, fields(lock = %name))]
    pub async fn extend<C>(
        &self,
        conn: &mut C,
        name: &str,
        owner: &OwnerToken,
        lease: Duration,
    ) -> Result<bool, KeylockError>
    where
        C: StoreConnection + ?Sized,
    {
        let lease_ms = lease_millis(lease)?;

        let reply = self
            .extend_script
            .invoke(conn, (name, owner.as_str(), lease_ms))
            .await
            .map_err(|e| {
                warn!(
                    target: "keylock.lock",
                    error = %e,
                    lock = %name,
                    "Failed to extend lock"
                );
                e
            })?;

        let extended = interpret_owner_check(reply, "extend")?;
        debug!(
            target: "keylock.lock",
            lock = %name,
            extended,
            lease_ms,
            "Extend attempted"
        );
        Ok(extended)
    }
}

/// Read who holds `name` and how long the lease has left.
///
/// Two separate reads (`GET`, `PTTL`), so the snapshot may straddle an
/// expiry. For diagnostics only; never base a locking decision on it.
///
/// # Errors
///
/// Returns `KeylockError::Store` for store failures and
/// `KeylockError::UnexpectedReply` for malformed replies.
#[instrument(skip_all, fields(lock = %name))]
pub async fn inspect<C>(conn: &mut C, name: &str) -> Result<LockStatus, KeylockError>
where
    C: StoreConnection + ?Sized,
{
    let mut get = redis::cmd("GET");
    get.arg(name);
    let holder = match Reply::from(conn.execute(&get).await?) {
        Reply::Nil => None,
        reply => match reply.as_str() {
            Some(text) => Some(text.to_string()),
            None => {
                return Err(KeylockError::UnexpectedReply {
                    operation: "inspect",
                    reply: reply.to_string(),
                })
            }
        },
    };

    let mut pttl = redis::cmd("PTTL");
    pttl.arg(name);
    let remaining = Reply::from(conn.execute(&pttl).await?).into_integer("inspect")?;
    // -2: no such key, -1: key without expiry
    let ttl = u64::try_from(remaining).ok().map(Duration::from_millis);

    Ok(LockStatus {
        name: name.to_string(),
        holder,
        ttl,
    })
}

fn lease_millis(lease: Duration) -> Result<u64, KeylockError> {
    match u64::try_from(lease.as_millis()) {
        Ok(0) => Err(KeylockError::InvalidLease(format!(
            "{lease:?} is shorter than one millisecond"
        ))),
        Ok(ms) => Ok(ms),
        Err(_) => Err(KeylockError::InvalidLease(format!(
            "{lease:?} does not fit in a millisecond expiry"
        ))),
    }
}

/// `SET ... NX` answers `OK` when written and nil when the key exists.
fn interpret_set_reply(reply: Reply) -> Result<bool, KeylockError> {
    if reply.is_ok_status() {
        return Ok(true);
    }
    if reply.is_nil() {
        return Ok(false);
    }
    error!(
        target: "keylock.lock",
        reply = %reply,
        "Unexpected reply to conditional set"
    );
    Err(KeylockError::UnexpectedReply {
        operation: "acquire",
        reply: reply.to_string(),
    })
}

/// Owner-checked scripts answer 1 when they acted and 0 when the caller is
/// not the holder. Anything else is a script or protocol mismatch.
fn interpret_owner_check(reply: Reply, operation: &'static str) -> Result<bool, KeylockError> {
    match reply.into_integer(operation) {
        Ok(1) => Ok(true),
        Ok(0) => Ok(false),
        Ok(other) => {
            error!(
                target: "keylock.lock",
                operation,
                result = other,
                "Owner-checked script returned out-of-range integer"
            );
            Err(KeylockError::UnexpectedReply {
                operation,
                reply: Reply::Integer(other).to_string(),
            })
        }
        Err(e) => {
            error!(
                target: "keylock.lock",
                operation,
                error = %e,
                "Owner-checked script returned non-integer"
            );
            Err(e)
        }
    }
}
