//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **persistence**: PostgreSQL repositories using Diesel ORM
//! - **cache**: Redis-backed user, follow-list, post, and feed cache
//! - **queue**: partitioned post event log (PostgreSQL and in-memory)
//! - **hashing**: Argon2id credential hashing
//! - **metrics**: fan-out counters, with a Prometheus adapter behind the
//!   `metrics` feature
//!
//! Adapters are thin translators that convert between domain types and
//! infrastructure-specific representations. They contain no business logic.

pub mod cache;
pub mod hashing;
pub mod metrics;
pub mod persistence;
pub mod queue;
