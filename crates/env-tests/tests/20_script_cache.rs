//! Live Store Tests: Script Cache
//!
//! Verifies digest-first invocation against a real script cache. These tests
//! run `SCRIPT FLUSH` and are serialized.

#![cfg(feature = "redis")]

use env_tests::store::{connect, unique_lock_name};
use keylock::script::source_digest;
use keylock::{LeaseLock, OwnerToken, RedisConnection, Reply, Script, StoreConnection};
use serial_test::serial;
use std::time::Duration;

const ECHO_KEY_AND_ARG: &str = "return {KEYS[1], ARGV[1]}";

async fn store() -> RedisConnection {
    connect()
        .await
        .expect("Failed to connect to Redis - ensure REDIS_URL points at a running instance")
}

async fn flush_scripts(conn: &mut RedisConnection) {
    let mut cmd = redis::cmd("SCRIPT");
    cmd.arg("FLUSH");
    conn.execute(&cmd).await.expect("SCRIPT FLUSH should succeed");
}

#[tokio::test]
async fn test_store_digest_matches_local_digest() {
    let mut conn = store().await;
    let script = Script::new(1, ECHO_KEY_AND_ARG);

    let mut cmd = redis::cmd("SCRIPT");
    cmd.arg("LOAD").arg(ECHO_KEY_AND_ARG);
    let reply = Reply::from(conn.execute(&cmd).await.unwrap());

    assert_eq!(reply.as_str(), Some(script.hash()));
    assert_eq!(script.hash(), source_digest(ECHO_KEY_AND_ARG));
}

#[tokio::test]
#[serial]
async fn test_invoke_after_flush_falls_back_to_source() {
    let mut conn = store().await;
    let script = Script::new(1, ECHO_KEY_AND_ARG);
    flush_scripts(&mut conn).await;

    assert!(!script.exists(&mut conn).await.unwrap());

    let reply = script.invoke(&mut conn, ("k", "a")).await.unwrap();
    assert_eq!(
        reply,
        Reply::Array(vec![Reply::Bytes(b"k".to_vec()), Reply::Bytes(b"a".to_vec())])
    );

    // The fallback cached the script
    assert!(script.exists(&mut conn).await.unwrap());
}

#[tokio::test]
#[serial]
async fn test_load_then_send_hash() {
    let mut conn = store().await;
    let script = Script::new(1, ECHO_KEY_AND_ARG);
    flush_scripts(&mut conn).await;

    script.load(&mut conn).await.unwrap();
    script.send_hash(&mut conn, ("k", "1")).unwrap();
    script.send_hash(&mut conn, ("k", "2")).unwrap();
    assert_eq!(conn.pending(), 2);

    let replies = conn.flush().await.unwrap();
    assert_eq!(replies.len(), 2);
    assert_eq!(conn.pending(), 0);
}

#[tokio::test]
#[serial]
async fn test_send_caches_for_later_send_hash() {
    let mut conn = store().await;
    let script = Script::new(1, ECHO_KEY_AND_ARG);
    flush_scripts(&mut conn).await;

    script.send(&mut conn, ("k", "1")).unwrap();
    script.send_hash(&mut conn, ("k", "2")).unwrap();

    let replies = conn.flush().await.unwrap();
    assert_eq!(replies.len(), 2);
}

#[tokio::test]
#[serial]
async fn test_lock_release_after_flush() {
    let mut conn = store().await;
    let lock = LeaseLock::new();
    let name = unique_lock_name("flush");
    let owner = OwnerToken::generate();

    assert!(lock
        .acquire(&mut conn, &name, &owner, Duration::from_secs(30))
        .await
        .unwrap());
    flush_scripts(&mut conn).await;

    assert!(lock.release(&mut conn, &name, &owner).await.unwrap());
    assert!(lock.release_script().exists(&mut conn).await.unwrap());
}

#[tokio::test]
async fn test_clone_does_not_replay_queued_sends() {
    let mut conn = store().await;
    let counter = Script::new(1, "return redis.call('INCR', KEYS[1])");
    let key = unique_lock_name("send-once");

    counter.send(&mut conn, &key).unwrap();
    assert_eq!(conn.pending(), 1);

    // Per-task clone taken while a send is queued
    let mut per_task = conn.clone();
    assert_eq!(per_task.pending(), 0);

    assert_eq!(conn.flush().await.unwrap().len(), 1);
    assert!(per_task.flush().await.unwrap().is_empty());

    let mut get = redis::cmd("GET");
    get.arg(&key);
    let count = Reply::from(conn.execute(&get).await.unwrap());
    assert_eq!(count.as_str(), Some("1"), "One send must evaluate once");

    let mut del = redis::cmd("DEL");
    del.arg(&key);
    conn.execute(&del).await.unwrap();
}
