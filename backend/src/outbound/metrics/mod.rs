//! Outbound adapters for fan-out metrics.
//!
//! [`FanoutCounters`] is always available. The Prometheus adapter is gated
//! behind the `metrics` feature.

mod fanout_counters;
#[cfg(feature = "metrics")]
mod prometheus_fanout;

pub use fanout_counters::{FanoutCounterSnapshot, FanoutCounters};
#[cfg(feature = "metrics")]
pub use prometheus_fanout::PrometheusFanoutMetrics;
