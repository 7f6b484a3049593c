//! Partitioned post event log adapters.
//!
//! Both adapters implement [`PostEventPublisher`] and [`PostEventSource`]
//! with the same contract: events are routed by [`Partitioner`] on the
//! author id, each partition is delivered in offset order to one group
//! member at a time, and uncommitted records are redelivered after a
//! partition changes hands.
//!
//! - [`PostgresPostLog`]: durable, multi-process, lease-based claims.
//! - [`InMemoryPostLog`]: single process, for tests and local development.
//!
//! [`PostEventPublisher`]: crate::domain::ports::PostEventPublisher
//! [`PostEventSource`]: crate::domain::ports::PostEventSource

mod memory_log;
mod partitioner;
mod postgres_log;

pub use memory_log::InMemoryPostLog;
pub use partitioner::Partitioner;
pub use postgres_log::{PostgresLogConfig, PostgresPostLog};
