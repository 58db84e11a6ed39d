//! keylock: a lease-based distributed lock on Redis.
//!
//! - [`lock`] - acquire / release / extend over named locks
//! - [`script`] - atomic Lua execution with digest-first, source-fallback invocation
//! - [`store`] - connection seam and uninterpreted reply model
//! - [`config`] - configuration from environment
//! - [`errors`] - error types
//!
//! # Key Design Decisions
//!
//! - **No local lock state**: the store is the only synchronization point;
//!   nothing caches ownership in process
//! - **Bounded leases**: every lock entry carries an expiry, which is the
//!   recovery path for crashed or partitioned holders
//! - **Owner-checked release**: check-then-delete runs as one Lua script, so a
//!   stale holder cannot delete the next holder's lock
//! - **Contention is not an error**: `Ok(false)` means held elsewhere or not
//!   owner; `Err` means the caller cannot know

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

pub mod config;
pub mod errors;
pub mod lock;
pub mod script;
pub mod store;

pub use common::types::OwnerToken;
pub use errors::KeylockError;
pub use lock::{inspect, LeaseLock, LockStatus};
pub use script::{KeyCount, Script};
pub use store::{RedisConnection, Reply, StoreConnection};
