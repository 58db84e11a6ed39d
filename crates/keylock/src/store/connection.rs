//! Store connection seam.
//!
//! The lock and script executor only need a request/response channel to the
//! store, plus a send queue for fire-and-forget script calls. Production code
//! uses [`RedisConnection`]; tests plug in an in-memory store through the
//! same trait.
//!
//! # Connection Pattern
//!
//! The redis-rs `MultiplexedConnection` is cheap to clone and safe to share
//! across tasks. Each task should hold its own `RedisConnection` (via
//! [`RedisConnection::clone`]). A clone shares the multiplexed handle but
//! starts with an empty send queue, so a queued command runs once, on the
//! connection that queued it.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Cmd, Pipeline, RedisResult, Value};
use tracing::{debug, error};

/// A channel to the store, safe for one in-flight request at a time.
#[async_trait]
pub trait StoreConnection: Send {
    /// Send one command and wait for its reply.
    async fn execute(&mut self, cmd: &Cmd) -> RedisResult<Value>;

    /// Queue a command without waiting for its reply.
    fn send(&mut self, cmd: &Cmd) -> RedisResult<()>;

    /// Send every queued command and collect the replies in order.
    ///
    /// Returns an empty list when nothing is queued.
    async fn flush(&mut self) -> RedisResult<Vec<Value>>;
}

/// [`StoreConnection`] over a redis-rs multiplexed connection.
pub struct RedisConnection {
    connection: MultiplexedConnection,
    pending: Pipeline,
    pending_count: usize,
}

impl RedisConnection {
    /// Open a client for `redis_url` and connect.
    ///
    /// # Errors
    ///
    /// Returns the client error if the URL is invalid or the connection fails.
    pub async fn open(redis_url: &str) -> RedisResult<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            // Note: Do NOT log redis_url as it may contain credentials
            error!(
                target: "keylock.store",
                error = %e,
                "Failed to open Redis client"
            );
            e
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(
                    target: "keylock.store",
                    error = %e,
                    "Failed to connect to Redis"
                );
                e
            })?;

        debug!(target: "keylock.store", "Connected to Redis");
        Ok(Self::from_connection(connection))
    }

    /// Wrap an already established multiplexed connection.
    pub fn from_connection(connection: MultiplexedConnection) -> Self {
        Self {
            connection,
            pending: redis::pipe(),
            pending_count: 0,
        }
    }

    /// Number of commands queued by [`StoreConnection::send`] and not yet flushed.
    pub fn pending(&self) -> usize {
        self.pending_count
    }
}

impl Clone for RedisConnection {
    /// Share the multiplexed handle; the send queue is not copied.
    fn clone(&self) -> Self {
        Self::from_connection(self.connection.clone())
    }
}

#[async_trait]
impl StoreConnection for RedisConnection {
    async fn execute(&mut self, cmd: &Cmd) -> RedisResult<Value> {
        cmd.query_async(&mut self.connection).await
    }

    fn send(&mut self, cmd: &Cmd) -> RedisResult<()> {
        self.pending.add_command(cmd.clone());
        self.pending_count += 1;
        Ok(())
    }

    async fn flush(&mut self) -> RedisResult<Vec<Value>> {
        if self.pending_count == 0 {
            return Ok(Vec::new());
        }

        let pipeline = std::mem::replace(&mut self.pending, redis::pipe());
        let queued = std::mem::take(&mut self.pending_count);

        debug!(target: "keylock.store", queued, "Flushing queued commands");
        pipeline.query_async(&mut self.connection).await
    }
}
