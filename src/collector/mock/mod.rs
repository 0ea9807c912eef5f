//! Mock memcached server for testing.
//!
//! This module provides `MockServer` and pre-built scenarios for testing
//! collectors without a running memcached.

mod scenarios;
mod server;

pub use scenarios::typical_reply;
pub use server::{MockServer, Reply};
