//! Common utilities and types shared across keylock crates.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;
