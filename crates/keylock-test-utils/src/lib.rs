//! # keylock Test Utilities
//!
//! In-memory stand-ins for the remote store, so lock and script behavior can
//! be tested without a running Redis.
//!
//! - `mock_store` - keyspace with expiry, digest-keyed script cache, command
//!   log and one-shot failure injection
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keylock::{LeaseLock, OwnerToken};
//! use keylock_test_utils::MockStore;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let store = MockStore::new();
//!     let mut conn = store.connection();
//!     let lock = LeaseLock::new();
//!     let owner = OwnerToken::generate();
//!
//!     assert!(lock.acquire(&mut conn, "lk", &owner, Duration::from_secs(30)).await.unwrap());
//!     assert_eq!(store.command_names(), vec!["SET"]);
//! }
//! ```

pub mod mock_store;

pub use mock_store::*;
