//! Atomic script execution.
//!
//! A [`Script`] pairs a Lua source with its SHA-1 digest, which is how Redis
//! names cached scripts. [`Script::invoke`] optimistically evaluates by
//! digest (`EVALSHA`) and falls back to the full source (`EVAL`) only when the
//! store reports the script is not cached. The fallback caches the script
//! remotely, so the next call is digest-only again.
//!
//! # Usage
//!
//! ```rust,ignore
//! let script = Script::new(1, lua_scripts::COMPARE_AND_DELETE);
//!
//! // Digest-first, source on NOSCRIPT
//! let reply = script.invoke(&mut conn, ("lock:jobs", owner.as_str())).await?;
//! let deleted = reply.into_integer("release")?;
//!
//! // Scripts without keys or arguments: `()` is not a redis argument
//! let reply = Script::new(0, "return redis.call('DBSIZE')")
//!     .invoke(&mut conn, NO_ARGS)
//!     .await?;
//! ```
//!
//! # Argument Layout
//!
//! Requests are assembled as `[identifier, key_count?, keys..., args...]`.
//! The key count is inserted only for [`KeyCount::Fixed`]; with
//! [`KeyCount::Supplied`] the caller's first element is the count.

pub mod lua_scripts;

use crate::store::{Reply, StoreConnection};
use redis::{Cmd, ErrorKind, RedisError, RedisResult, ToRedisArgs};
use ring::digest;
use tracing::{debug, instrument, warn};

/// How many leading parameters are store keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCount {
    /// Fixed at construction and inserted into every request.
    Fixed(usize),
    /// Supplied by the caller as the first element of each call's parameters.
    Supplied,
}

/// Empty key/argument list for scripts that take neither.
pub const NO_ARGS: &[&str] = &[];

/// Immutable script descriptor: key-count mode, source, and digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    key_count: KeyCount,
    source: String,
    hash: String,
}

/// Lowercase hex SHA-1 of `source`, the identity Redis gives a cached script.
pub fn source_digest(source: &str) -> String {
    let digest = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, source.as_bytes());
    hex::encode(digest.as_ref())
}

/// Whether `err` is the store's "no script with that digest" reply.
///
/// Matches on the server error code, which redis-rs reports as `NOSCRIPT`
/// both for `ErrorKind::NoScriptError` and for an extension error carrying
/// that code. Message text is never inspected.
pub fn is_missing_script(err: &RedisError) -> bool {
    err.code() == Some("NOSCRIPT")
}

impl Script {
    /// Create a script whose first `key_count` parameters are keys.
    pub fn new(key_count: usize, source: impl Into<String>) -> Self {
        Self::build(KeyCount::Fixed(key_count), source.into())
    }

    /// Create a script whose key count varies per call.
    ///
    /// Each call must pass the key count as its first parameter.
    pub fn with_supplied_key_count(source: impl Into<String>) -> Self {
        Self::build(KeyCount::Supplied, source.into())
    }

    fn build(key_count: KeyCount, source: String) -> Self {
        let hash = source_digest(&source);
        Self {
            key_count,
            source,
            hash,
        }
    }

    /// Hex SHA-1 digest of the source.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn key_count(&self) -> KeyCount {
        self.key_count
    }

    fn short_hash(&self) -> &str {
        self.hash.get(..12).unwrap_or(&self.hash)
    }

    fn command(&self, name: &str, identifier: &str, keys_and_args: &[Vec<u8>]) -> Cmd {
        let mut cmd = redis::cmd(name);
        cmd.arg(identifier);
        if let KeyCount::Fixed(count) = self.key_count {
            cmd.arg(count);
        }
        for item in keys_and_args {
            cmd.arg(item.as_slice());
        }
        cmd
    }

    /// Evaluate the script and return its reply uninterpreted.
    ///
    /// Tries `EVALSHA` first. If the store has no script under this digest,
    /// retries once with `EVAL`, which also caches the script remotely.
    ///
    /// # Errors
    ///
    /// Any store error other than the cache miss is returned unchanged, as is
    /// any error from the `EVAL` fallback.
    #[instrument(skip_all, fields(script = %self.short_hash()))]
    pub async fn invoke<C, A>(&self, conn: &mut C, keys_and_args: A) -> RedisResult<Reply>
    where
        C: StoreConnection + ?Sized,
        A: ToRedisArgs,
    {
        let keys_and_args = keys_and_args.to_redis_args();

        let by_hash = self.command("EVALSHA", &self.hash, &keys_and_args);
        match conn.execute(&by_hash).await {
            Ok(value) => Ok(Reply::from(value)),
            Err(e) if is_missing_script(&e) => {
                debug!(
                    target: "keylock.script",
                    "Script not cached, evaluating by source"
                );
                let by_source = self.command("EVAL", &self.source, &keys_and_args);
                conn.execute(&by_source).await.map(Reply::from)
            }
            Err(e) => Err(e),
        }
    }

    /// Queue an `EVALSHA` without waiting for the reply.
    ///
    /// The script must already be cached, through an earlier [`Script::invoke`],
    /// [`Script::send`] or [`Script::load`]. Otherwise the store answers the
    /// queued request with a `NOSCRIPT` error at flush time.
    ///
    /// # Errors
    ///
    /// Returns the connection's error if the request cannot be queued.
    pub fn send_hash<C, A>(&self, conn: &mut C, keys_and_args: A) -> RedisResult<()>
    where
        C: StoreConnection + ?Sized,
        A: ToRedisArgs,
    {
        conn.send(&self.command("EVALSHA", &self.hash, &keys_and_args.to_redis_args()))
    }

    /// Queue an `EVAL` with the full source without waiting for the reply.
    ///
    /// # Errors
    ///
    /// Returns the connection's error if the request cannot be queued.
    pub fn send<C, A>(&self, conn: &mut C, keys_and_args: A) -> RedisResult<()>
    where
        C: StoreConnection + ?Sized,
        A: ToRedisArgs,
    {
        conn.send(&self.command("EVAL", &self.source, &keys_and_args.to_redis_args()))
    }

    /// Cache the script on the store without evaluating it (`SCRIPT LOAD`).
    ///
    /// # Errors
    ///
    /// Returns the store error unchanged.
    #[instrument(skip_all, fields(script = %self.short_hash()))]
    pub async fn load<C>(&self, conn: &mut C) -> RedisResult<()>
    where
        C: StoreConnection + ?Sized,
    {
        let mut cmd = redis::cmd("SCRIPT");
        cmd.arg("LOAD").arg(&self.source);

        let reply = Reply::from(conn.execute(&cmd).await?);
        if reply.as_str() == Some(self.hash.as_str()) {
            debug!(target: "keylock.script", "Script loaded");
        } else {
            warn!(
                target: "keylock.script",
                expected = %self.hash,
                reply = %reply,
                "Store reported a different digest for loaded script"
            );
        }
        Ok(())
    }

    /// Ask the store whether the script is cached (`SCRIPT EXISTS`).
    ///
    /// Diagnostic only; [`Script::invoke`] never checks the cache before evaluating.
    ///
    /// # Errors
    ///
    /// Returns the store error unchanged, or a `TypeError` if the reply is not
    /// an array of integers.
    pub async fn exists<C>(&self, conn: &mut C) -> RedisResult<bool>
    where
        C: StoreConnection + ?Sized,
    {
        let mut cmd = redis::cmd("SCRIPT");
        cmd.arg("EXISTS").arg(&self.hash);

        match Reply::from(conn.execute(&cmd).await?) {
            Reply::Array(flags) => match flags.first().and_then(Reply::as_integer) {
                Some(flag) => Ok(flag == 1),
                None => Err(RedisError::from((
                    ErrorKind::TypeError,
                    "Unexpected SCRIPT EXISTS reply",
                    format!("{}", Reply::Array(flags)),
                ))),
            },
            other => Err(RedisError::from((
                ErrorKind::TypeError,
                "Unexpected SCRIPT EXISTS reply",
                other.to_string(),
            ))),
        }
    }
}
