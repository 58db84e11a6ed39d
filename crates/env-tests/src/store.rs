//! Live store connection helpers.

use keylock::{RedisConnection, StoreConnection};
use thiserror::Error;

/// Used when `REDIS_URL` is not set.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Store connection errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis not reachable. Start one with 'docker run --rm -p 6379:6379 redis:7' or set REDIS_URL: {0}")]
    Unreachable(#[from] redis::RedisError),
}

/// Store URL for this run.
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string())
}

/// Open a connection and check it answers `PING`.
pub async fn connect() -> Result<RedisConnection, StoreError> {
    let mut conn = RedisConnection::open(&redis_url()).await?;
    conn.execute(&redis::cmd("PING")).await?;
    tracing::debug!(target: "env_tests.store", "Connected to store");
    Ok(conn)
}

/// Lock name unique to one test, so reruns and parallel tests never collide.
pub fn unique_lock_name(test: &str) -> String {
    format!("env-tests:{test}:{}", uuid::Uuid::new_v4())
}
