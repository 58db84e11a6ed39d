//! Environment Integration Test Suite
//!
//! Runs keylock against a live Redis instead of the in-memory mock, to catch
//! differences between the mock and real script caching, expiry and replies.
//!
//! # Features
//!
//! - `redis`: lock and script-cache tests against `REDIS_URL`
//!
//! # Prerequisites
//!
//! A reachable Redis, e.g. `docker run --rm -p 6379:6379 redis:7`. The
//! script-cache tests run `SCRIPT FLUSH`, so do not point this at a shared
//! instance.
//!
//! # Usage
//!
//! ```bash
//! # From repo root - runs 0 env-tests (no default features)
//! cargo test
//!
//! # Live store tests
//! REDIS_URL=redis://localhost:6379 cargo test -p env-tests --features redis
//! ```

pub mod eventual;
pub mod store;
