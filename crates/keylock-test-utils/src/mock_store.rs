//! In-memory store mock for keylock testing.
//!
//! Implements the subset of Redis the lock and script executor use:
//! - `GET`, `SET` (with `NX`/`XX`, `EX`/`PX`), `DEL`, `PEXPIRE`, `PTTL`, `TTL`, `PING`
//! - `EVAL`, `EVALSHA`, `SCRIPT LOAD | EXISTS | FLUSH` with a digest-keyed cache
//!
//! Lua is not interpreted. Each script source is registered with a Rust
//! handler that plays its part; keylock's own scripts are registered by
//! [`MockStore::new`]. `EVALSHA` answers `NOSCRIPT` until the source has been
//! sent through `EVAL` or `SCRIPT LOAD`, as on a real store.
//!
//! Expiry uses `tokio::time::Instant`, so `#[tokio::test(start_paused = true)]`
//! plus `tokio::time::advance` drives lease expiry deterministically.
//!
//! # Example
//!
//! ```rust,ignore
//! use keylock_test_utils::MockStore;
//!
//! let store = MockStore::new();
//! let mut conn = store.connection();
//!
//! assert!(lock.acquire(&mut conn, "lk", &owner, Duration::from_secs(30)).await?);
//! assert_eq!(store.get("lk").as_deref(), Some(owner.as_str()));
//!
//! // Emulate a store restart that dropped the script cache
//! store.flush_scripts();
//!
//! // Make the next EVALSHA fail like a broken connection
//! store.fail_next("EVALSHA", ErrorKind::IoError, "connection reset");
//! ```

use async_trait::async_trait;
use keylock::script::{lua_scripts, source_digest};
use keylock::StoreConnection;
use redis::{Cmd, ErrorKind, RedisError, RedisResult, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Rust stand-in for a Lua script body: `(keyspace, KEYS, ARGV) -> reply`.
pub type ScriptHandler =
    Arc<dyn Fn(&mut Keyspace, &[String], &[String]) -> RedisResult<Value> + Send + Sync>;

/// Shared in-memory store. Clones share state.
#[derive(Clone)]
pub struct MockStore {
    inner: Arc<Mutex<MockStoreInner>>,
}

#[derive(Default)]
struct MockStoreInner {
    keyspace: Keyspace,
    /// Digest -> source, populated by EVAL and SCRIPT LOAD
    script_cache: HashMap<String, String>,
    /// Digest -> handler standing in for the script body
    handlers: HashMap<String, ScriptHandler>,
    /// Every command the store received, in order
    command_log: Vec<Vec<String>>,
    injected_failures: VecDeque<InjectedFailure>,
}

struct InjectedFailure {
    command: String,
    kind: ErrorKind,
    detail: String,
}

/// String keys with optional expiry.
#[derive(Debug, Default)]
pub struct Keyspace {
    entries: HashMap<String, Entry>,
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Keyspace {
    fn purge_expired(&mut self, key: &str) {
        let expired = self
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.entries.remove(key);
        }
    }

    /// Current value, if present and not expired.
    pub fn get(&mut self, key: &str) -> Option<String> {
        self.purge_expired(key);
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Write a value, replacing any previous value and expiry.
    pub fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    /// Remove a key. Returns whether it existed.
    pub fn delete(&mut self, key: &str) -> bool {
        self.purge_expired(key);
        self.entries.remove(key).is_some()
    }

    /// Reset the expiry of an existing key. Returns whether it existed.
    pub fn pexpire(&mut self, key: &str, ttl: Duration) -> bool {
        self.purge_expired(key);
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }
    }

    /// Remaining lifetime in milliseconds: `-2` if missing, `-1` if no expiry.
    pub fn pttl(&mut self, key: &str) -> i64 {
        self.purge_expired(key);
        match self.entries.get(key) {
            None => -2,
            Some(Entry {
                expires_at: None, ..
            }) => -1,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(Instant::now());
                i64::try_from(remaining.as_millis()).unwrap_or(i64::MAX)
            }
        }
    }
}

fn response_error(detail: impl Into<String>) -> RedisError {
    RedisError::from((
        ErrorKind::ResponseError,
        "An error was signalled by the server",
        detail.into(),
    ))
}

fn no_script_error() -> RedisError {
    RedisError::from((
        ErrorKind::NoScriptError,
        "NOSCRIPT",
        "No matching script. Please use EVAL.".to_string(),
    ))
}

fn wrong_arity(command: &str) -> RedisError {
    response_error(format!(
        "ERR wrong number of arguments for '{}' command",
        command.to_ascii_lowercase()
    ))
}

fn parse_count(raw: &str) -> RedisResult<u64> {
    raw.parse()
        .map_err(|_| response_error("ERR value is not an integer or out of range"))
}

/// Handler for [`lua_scripts::COMPARE_AND_DELETE`].
fn compare_and_delete(keyspace: &mut Keyspace, keys: &[String], args: &[String]) -> RedisResult<Value> {
    let (Some(key), Some(owner)) = (keys.first(), args.first()) else {
        return Err(response_error("ERR Error running script: missing KEYS[1] or ARGV[1]"));
    };
    if keyspace.get(key).as_deref() == Some(owner.as_str()) {
        Ok(Value::Int(i64::from(keyspace.delete(key))))
    } else {
        Ok(Value::Int(0))
    }
}

/// Handler for [`lua_scripts::COMPARE_AND_EXTEND`].
fn compare_and_extend(keyspace: &mut Keyspace, keys: &[String], args: &[String]) -> RedisResult<Value> {
    let (Some(key), Some(owner), Some(lease_ms)) = (keys.first(), args.first(), args.get(1)) else {
        return Err(response_error(
            "ERR Error running script: missing KEYS[1], ARGV[1] or ARGV[2]",
        ));
    };
    let lease_ms = parse_count(lease_ms)?;
    if keyspace.get(key).as_deref() == Some(owner.as_str()) {
        Ok(Value::Int(i64::from(
            keyspace.pexpire(key, Duration::from_millis(lease_ms)),
        )))
    } else {
        Ok(Value::Int(0))
    }
}

/// Split `[numkeys, keys..., args...]` into keys and args.
fn split_keys_and_args(rest: &[String]) -> RedisResult<(Vec<String>, Vec<String>)> {
    let (numkeys, rest) = rest.split_first().ok_or_else(|| wrong_arity("EVAL"))?;
    let numkeys = usize::try_from(parse_count(numkeys)?)
        .map_err(|_| response_error("ERR value is not an integer or out of range"))?;
    if numkeys > rest.len() {
        return Err(response_error(
            "ERR Number of keys can't be greater than number of args",
        ));
    }
    let (keys, args) = rest.split_at(numkeys);
    Ok((keys.to_vec(), args.to_vec()))
}

fn args_of(cmd: &Cmd) -> Vec<String> {
    cmd.args_iter()
        .filter_map(|arg| match arg {
            redis::Arg::Simple(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            redis::Arg::Cursor => None,
        })
        .collect()
}

impl MockStoreInner {
    fn run_script(&mut self, digest: &str, keys: &[String], args: &[String]) -> RedisResult<Value> {
        let handler = self.handlers.get(digest).cloned().ok_or_else(|| {
            response_error(format!(
                "ERR mock store has no handler for script {digest}"
            ))
        })?;
        handler(&mut self.keyspace, keys, args)
    }

    fn cache_script(&mut self, source: &str) -> String {
        let digest = source_digest(source);
        self.script_cache
            .insert(digest.clone(), source.to_string());
        digest
    }

    fn set_command(&mut self, rest: &[String]) -> RedisResult<Value> {
        let [key, value, options @ ..] = rest else {
            return Err(wrong_arity("SET"));
        };

        let mut only_if_absent = false;
        let mut only_if_present = false;
        let mut ttl = None;
        let mut options = options.iter();
        while let Some(option) = options.next() {
            match option.to_ascii_uppercase().as_str() {
                "NX" => only_if_absent = true,
                "XX" => only_if_present = true,
                unit @ ("EX" | "PX") => {
                    let amount = options
                        .next()
                        .ok_or_else(|| response_error("ERR syntax error"))
                        .and_then(|raw| parse_count(raw))?;
                    if amount == 0 {
                        return Err(response_error("ERR invalid expire time in 'set' command"));
                    }
                    ttl = Some(if unit == "EX" {
                        Duration::from_secs(amount)
                    } else {
                        Duration::from_millis(amount)
                    });
                }
                _ => return Err(response_error("ERR syntax error")),
            }
        }
        if only_if_absent && only_if_present {
            return Err(response_error("ERR syntax error"));
        }

        let exists = self.keyspace.get(key).is_some();
        if (only_if_absent && exists) || (only_if_present && !exists) {
            return Ok(Value::Nil);
        }
        self.keyspace.set(key, value, ttl);
        Ok(Value::Okay)
    }

    fn script_command(&mut self, rest: &[String]) -> RedisResult<Value> {
        let (sub, rest) = rest.split_first().ok_or_else(|| wrong_arity("SCRIPT"))?;
        match sub.to_ascii_uppercase().as_str() {
            "LOAD" => match rest {
                [source] => Ok(Value::BulkString(self.cache_script(source).into_bytes())),
                _ => Err(wrong_arity("SCRIPT|LOAD")),
            },
            "EXISTS" => Ok(Value::Array(
                rest.iter()
                    .map(|digest| {
                        let cached = self
                            .script_cache
                            .contains_key(&digest.to_ascii_lowercase());
                        Value::Int(i64::from(cached))
                    })
                    .collect(),
            )),
            "FLUSH" => {
                self.script_cache.clear();
                Ok(Value::Okay)
            }
            other => Err(response_error(format!(
                "ERR unknown subcommand '{other}'"
            ))),
        }
    }

    fn dispatch(&mut self, args: Vec<String>) -> RedisResult<Value> {
        self.command_log.push(args.clone());

        let Some((name, rest)) = args.split_first() else {
            return Err(response_error("ERR empty command"));
        };
        let name = name.to_ascii_uppercase();

        if let Some(failure) = self
            .injected_failures
            .iter()
            .position(|failure| failure.command == name)
            .and_then(|position| self.injected_failures.remove(position))
        {
            return Err(RedisError::from((
                failure.kind,
                "Injected failure",
                failure.detail,
            )));
        }

        match (name.as_str(), rest) {
            ("PING", _) => Ok(Value::SimpleString("PONG".to_string())),
            ("GET", [key]) => Ok(self
                .keyspace
                .get(key)
                .map_or(Value::Nil, |value| Value::BulkString(value.into_bytes()))),
            ("SET", _) => self.set_command(rest),
            ("DEL", keys) if !keys.is_empty() => {
                let deleted = keys.iter().filter(|key| self.keyspace.delete(key)).count();
                Ok(Value::Int(i64::try_from(deleted).unwrap_or(i64::MAX)))
            }
            ("PEXPIRE", [key, ms]) => {
                let ms = parse_count(ms)?;
                Ok(Value::Int(i64::from(
                    self.keyspace.pexpire(key, Duration::from_millis(ms)),
                )))
            }
            ("PTTL", [key]) => Ok(Value::Int(self.keyspace.pttl(key))),
            ("TTL", [key]) => {
                let ms = self.keyspace.pttl(key);
                // Redis rounds to the nearest second
                Ok(Value::Int(if ms < 0 { ms } else { (ms + 500) / 1000 }))
            }
            ("EVAL", [source, rest @ ..]) => {
                let (keys, args) = split_keys_and_args(rest)?;
                let digest = self.cache_script(source);
                self.run_script(&digest, &keys, &args)
            }
            ("EVALSHA", [digest, rest @ ..]) => {
                let (keys, args) = split_keys_and_args(rest)?;
                let digest = digest.to_ascii_lowercase();
                if !self.script_cache.contains_key(&digest) {
                    return Err(no_script_error());
                }
                self.run_script(&digest, &keys, &args)
            }
            ("SCRIPT", _) => self.script_command(rest),
            ("GET" | "DEL" | "PEXPIRE" | "PTTL" | "TTL" | "EVAL" | "EVALSHA", _) => {
                Err(wrong_arity(&name))
            }
            (other, _) => Err(response_error(format!(
                "ERR unknown command '{}'",
                other.to_ascii_lowercase()
            ))),
        }
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    /// Create an empty store that knows keylock's own scripts.
    ///
    /// The script cache starts empty: the first `EVALSHA` answers `NOSCRIPT`.
    #[must_use]
    pub fn new() -> Self {
        let store = Self {
            inner: Arc::new(Mutex::new(MockStoreInner::default())),
        };
        store.register_script(lua_scripts::COMPARE_AND_DELETE, compare_and_delete);
        store.register_script(lua_scripts::COMPARE_AND_EXTEND, compare_and_extend);
        store
    }

    /// Register (or replace) the handler standing in for `source`.
    ///
    /// Registration does not cache the script; use `EVAL` or `SCRIPT LOAD`.
    pub fn register_script<F>(&self, source: &str, handler: F)
    where
        F: Fn(&mut Keyspace, &[String], &[String]) -> RedisResult<Value> + Send + Sync + 'static,
    {
        let handler: ScriptHandler = Arc::new(handler);
        let mut inner = self.inner.lock().unwrap();
        inner.handlers.insert(source_digest(source), handler);
    }

    /// Builder form of [`MockStore::register_script`].
    #[must_use]
    pub fn with_script<F>(self, source: &str, handler: F) -> Self
    where
        F: Fn(&mut Keyspace, &[String], &[String]) -> RedisResult<Value> + Send + Sync + 'static,
    {
        self.register_script(source, handler);
        self
    }

    /// Builder form of [`MockStore::set`].
    #[must_use]
    pub fn with_value(self, key: &str, value: &str, ttl: Option<Duration>) -> Self {
        self.set(key, value, ttl);
        self
    }

    /// Open a connection. Each connection has its own send queue.
    pub fn connection(&self) -> MockConnection {
        MockConnection {
            store: self.clone(),
            pending: Vec::new(),
        }
    }

    /// Get a value directly, bypassing the command log.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.keyspace.get(key)
    }

    /// Set a value directly, bypassing the command log.
    pub fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let mut inner = self.inner.lock().unwrap();
        inner.keyspace.set(key, value, ttl);
    }

    /// Remaining lifetime of `key`, or `None` if missing or without expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut inner = self.inner.lock().unwrap();
        u64::try_from(inner.keyspace.pttl(key))
            .ok()
            .map(Duration::from_millis)
    }

    /// Whether the script cache holds `digest`.
    pub fn is_script_cached(&self, digest: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.script_cache.contains_key(digest)
    }

    /// Drop every cached script, as a store restart or `SCRIPT FLUSH` would.
    pub fn flush_scripts(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.script_cache.clear();
    }

    /// Make the next `command` the store receives fail with `kind`.
    pub fn fail_next(&self, command: &str, kind: ErrorKind, detail: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.injected_failures.push_back(InjectedFailure {
            command: command.to_ascii_uppercase(),
            kind,
            detail: detail.to_string(),
        });
    }

    /// Every command received so far, as `[name, args...]`.
    pub fn commands(&self) -> Vec<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        inner.command_log.clone()
    }

    /// Names of the commands received so far, uppercased.
    pub fn command_names(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .command_log
            .iter()
            .filter_map(|args| args.first().map(|name| name.to_ascii_uppercase()))
            .collect()
    }

    /// Forget the command log.
    pub fn clear_log(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.command_log.clear();
    }

    fn dispatch(&self, args: Vec<String>) -> RedisResult<Value> {
        let mut inner = self.inner.lock().unwrap();
        inner.dispatch(args)
    }
}

/// One client connection to a [`MockStore`].
pub struct MockConnection {
    store: MockStore,
    pending: Vec<Vec<String>>,
}

impl MockConnection {
    /// Commands queued by `send` and not yet flushed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl StoreConnection for MockConnection {
    async fn execute(&mut self, cmd: &Cmd) -> RedisResult<Value> {
        self.store.dispatch(args_of(cmd))
    }

    fn send(&mut self, cmd: &Cmd) -> RedisResult<()> {
        self.pending.push(args_of(cmd));
        Ok(())
    }

    async fn flush(&mut self) -> RedisResult<Vec<Value>> {
        // Every queued command runs; the first error is reported, like a pipeline
        let replies: Vec<RedisResult<Value>> = std::mem::take(&mut self.pending)
            .into_iter()
            .map(|args| self.store.dispatch(args))
            .collect();
        replies.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(conn: &mut MockConnection, args: &[&str]) -> RedisResult<Value> {
        let mut cmd = redis::Cmd::new();
        for arg in args {
            cmd.arg(*arg);
        }
        conn.execute(&cmd).await
    }

    #[tokio::test]
    async fn test_set_nx_only_writes_absent_keys() {
        let store = MockStore::new();
        let mut conn = store.connection();

        assert_eq!(
            run(&mut conn, &["SET", "lk", "v1", "PX", "30000", "NX"]).await.unwrap(),
            Value::Okay
        );
        assert_eq!(
            run(&mut conn, &["SET", "lk", "v2", "PX", "30000", "NX"]).await.unwrap(),
            Value::Nil
        );
        assert_eq!(store.get("lk").as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_set_rejects_zero_expiry() {
        let store = MockStore::new();
        let mut conn = store.connection();

        let err = run(&mut conn, &["SET", "lk", "v1", "EX", "0", "NX"])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResponseError);
        assert!(store.get("lk").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_expire_with_paused_clock() {
        let store = MockStore::new().with_value("lk", "v1", Some(Duration::from_secs(1)));

        assert_eq!(store.ttl("lk"), Some(Duration::from_secs(1)));
        tokio::time::advance(Duration::from_millis(999)).await;
        assert_eq!(store.get("lk").as_deref(), Some("v1"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(store.get("lk").is_none());
    }

    #[tokio::test]
    async fn test_pttl_and_ttl_sentinels() {
        let store = MockStore::new().with_value("forever", "v", None);
        let mut conn = store.connection();

        assert_eq!(run(&mut conn, &["PTTL", "missing"]).await.unwrap(), Value::Int(-2));
        assert_eq!(run(&mut conn, &["PTTL", "forever"]).await.unwrap(), Value::Int(-1));
        assert_eq!(run(&mut conn, &["TTL", "missing"]).await.unwrap(), Value::Int(-2));
    }

    #[tokio::test]
    async fn test_evalsha_misses_until_script_is_cached() {
        let store = MockStore::new();
        let mut conn = store.connection();
        let digest = source_digest(lua_scripts::COMPARE_AND_DELETE);

        let err = run(&mut conn, &["EVALSHA", &digest, "1", "lk", "v1"])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoScriptError);

        let loaded = run(&mut conn, &["SCRIPT", "LOAD", lua_scripts::COMPARE_AND_DELETE])
            .await
            .unwrap();
        assert_eq!(loaded, Value::BulkString(digest.clone().into_bytes()));
        assert!(store.is_script_cached(&digest));

        assert_eq!(
            run(&mut conn, &["EVALSHA", &digest, "1", "lk", "v1"]).await.unwrap(),
            Value::Int(0)
        );
    }

    #[tokio::test]
    async fn test_eval_caches_and_runs_handler() {
        let store = MockStore::new().with_value("lk", "v1", Some(Duration::from_secs(30)));
        let mut conn = store.connection();

        let deleted = run(
            &mut conn,
            &["EVAL", lua_scripts::COMPARE_AND_DELETE, "1", "lk", "v1"],
        )
        .await
        .unwrap();
        assert_eq!(deleted, Value::Int(1));
        assert!(store.get("lk").is_none());
        assert!(store.is_script_cached(&source_digest(lua_scripts::COMPARE_AND_DELETE)));
    }

    #[tokio::test]
    async fn test_eval_of_unregistered_script_fails() {
        let store = MockStore::new();
        let mut conn = store.connection();

        let err = run(&mut conn, &["EVAL", "return 42", "0"]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResponseError);
    }

    #[tokio::test]
    async fn test_eval_rejects_too_many_keys() {
        let store = MockStore::new();
        let mut conn = store.connection();

        let err = run(&mut conn, &["EVAL", lua_scripts::COMPARE_AND_DELETE, "3", "lk"])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResponseError);
    }

    #[tokio::test]
    async fn test_script_exists_and_flush() {
        let store = MockStore::new();
        let mut conn = store.connection();
        let digest = source_digest(lua_scripts::COMPARE_AND_EXTEND);

        run(&mut conn, &["SCRIPT", "LOAD", lua_scripts::COMPARE_AND_EXTEND])
            .await
            .unwrap();
        assert_eq!(
            run(&mut conn, &["SCRIPT", "EXISTS", &digest, "0000"]).await.unwrap(),
            Value::Array(vec![Value::Int(1), Value::Int(0)])
        );

        store.flush_scripts();
        assert!(!store.is_script_cached(&digest));
    }

    #[tokio::test]
    async fn test_injected_failure_hits_only_named_command() {
        let store = MockStore::new();
        let mut conn = store.connection();
        store.fail_next("GET", ErrorKind::IoError, "connection reset");

        assert!(run(&mut conn, &["PING"]).await.is_ok());

        let err = run(&mut conn, &["GET", "lk"]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoError);

        // One-shot
        assert_eq!(run(&mut conn, &["GET", "lk"]).await.unwrap(), Value::Nil);
    }

    #[tokio::test]
    async fn test_send_queues_until_flush() {
        let store = MockStore::new();
        let mut conn = store.connection();

        let mut cmd = redis::Cmd::new();
        cmd.arg("SET").arg("lk").arg("v1");
        conn.send(&cmd).unwrap();

        assert_eq!(conn.pending(), 1);
        assert!(store.commands().is_empty());

        let replies = conn.flush().await.unwrap();
        assert_eq!(replies, vec![Value::Okay]);
        assert_eq!(conn.pending(), 0);
        assert_eq!(store.command_names(), vec!["SET".to_string()]);
    }
}
