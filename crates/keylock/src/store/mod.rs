//! Store access: the connection seam and the reply model.
//!
//! - [`StoreConnection`] - request/response channel plus a send queue
//! - [`RedisConnection`] - redis-rs implementation of the seam
//! - [`Reply`] - uninterpreted reply, coerced by the caller

pub mod connection;
pub mod reply;

pub use connection::{RedisConnection, StoreConnection};
pub use reply::Reply;
