//! Social graph and newsfeed backend.
//!
//! - [`domain`]: users, follows, posts, the cache-aside services, and the
//!   fan-out-on-write consumer.
//! - [`outbound`]: PostgreSQL, Redis, event log, hashing, and metrics
//!   adapters implementing the domain ports.
//! - [`config`]: OrthoConfig settings for the fan-out worker.

pub mod config;
pub mod domain;
pub mod outbound;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
