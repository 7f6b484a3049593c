//! Domain port surface for recording fan-out consumer outcomes.
//!
//! This port enables observability of feed delivery without coupling the
//! consumer to a specific metrics backend. Recording failures never affect
//! delivery.

use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors exposed when recording fan-out metrics.
    pub enum FanoutMetricsError {
        /// Metric exporter rejected the write.
        Export { message: String } => "fan-out metrics exporter failed: {message}",
    }
}

/// Why a record was dropped without reaching every feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// The payload did not decode as a `PostCreated` event.
    Malformed,
    /// Every retry attempt failed.
    RetriesExhausted,
}

/// Counters for the fan-out consumer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FanoutMetrics: Send + Sync {
    /// One event was delivered to `recipients` feeds.
    async fn record_delivered(&self, recipients: usize) -> Result<(), FanoutMetricsError>;

    /// One processing attempt failed and will be retried.
    async fn record_retry(&self) -> Result<(), FanoutMetricsError>;

    /// One record was committed without full delivery.
    async fn record_dropped(&self, reason: DropReason) -> Result<(), FanoutMetricsError>;

    /// Partition ownership changed.
    async fn record_rebalance(&self) -> Result<(), FanoutMetricsError>;
}

/// No-op implementation for when metrics are disabled or in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpFanoutMetrics;

#[async_trait]
impl FanoutMetrics for NoOpFanoutMetrics {
    async fn record_delivered(&self, _recipients: usize) -> Result<(), FanoutMetricsError> {
        Ok(())
    }

    async fn record_retry(&self) -> Result<(), FanoutMetricsError> {
        Ok(())
    }

    async fn record_dropped(&self, _reason: DropReason) -> Result<(), FanoutMetricsError> {
        Ok(())
    }

    async fn record_rebalance(&self) -> Result<(), FanoutMetricsError> {
        Ok(())
    }
}
