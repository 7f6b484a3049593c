//! In-process counter registry for fan-out consumer outcomes.
//!
//! The structure is fixed when the registry is built; recording only bumps
//! atomics, so it never fails and never blocks the consumer.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::domain::ports::{DropReason, FanoutMetrics, FanoutMetricsError};

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanoutCounterSnapshot {
    /// Events delivered to every follower.
    pub delivered_events: u64,
    /// Feed entries written across all deliveries.
    pub delivered_entries: u64,
    /// Fan-out attempts that were retried.
    pub retries: u64,
    /// Records skipped because they could not be decoded.
    pub dropped_malformed: u64,
    /// Records dropped after the last attempt failed.
    pub dropped_exhausted: u64,
    /// Partition assignment changes.
    pub rebalances: u64,
}

/// Atomic counters implementing [`FanoutMetrics`].
#[derive(Debug, Default)]
pub struct FanoutCounters {
    delivered_events: AtomicU64,
    delivered_entries: AtomicU64,
    retries: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_exhausted: AtomicU64,
    rebalances: AtomicU64,
}

impl FanoutCounters {
    /// All counters start at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every counter.
    pub fn snapshot(&self) -> FanoutCounterSnapshot {
        FanoutCounterSnapshot {
            delivered_events: self.delivered_events.load(Ordering::Relaxed),
            delivered_entries: self.delivered_entries.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_exhausted: self.dropped_exhausted.load(Ordering::Relaxed),
            rebalances: self.rebalances.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl FanoutMetrics for FanoutCounters {
    async fn record_delivered(&self, recipients: usize) -> Result<(), FanoutMetricsError> {
        self.delivered_events.fetch_add(1, Ordering::Relaxed);
        self.delivered_entries.fetch_add(
            u64::try_from(recipients).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        Ok(())
    }

    async fn record_retry(&self) -> Result<(), FanoutMetricsError> {
        self.retries.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn record_dropped(&self, reason: DropReason) -> Result<(), FanoutMetricsError> {
        let counter = match reason {
            DropReason::Malformed => &self.dropped_malformed,
            DropReason::RetriesExhausted => &self.dropped_exhausted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn record_rebalance(&self) -> Result<(), FanoutMetricsError> {
        self.rebalances.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[tokio::test]
    async fn counts_each_outcome_separately() {
        let counters = FanoutCounters::new();
        counters.record_delivered(3).await.expect("record");
        counters.record_delivered(2).await.expect("record");
        counters.record_retry().await.expect("record");
        counters
            .record_dropped(DropReason::Malformed)
            .await
            .expect("record");
        counters.record_rebalance().await.expect("record");

        assert_eq!(
            counters.snapshot(),
            FanoutCounterSnapshot {
                delivered_events: 2,
                delivered_entries: 5,
                retries: 1,
                dropped_malformed: 1,
                dropped_exhausted: 0,
                rebalances: 1,
            }
        );
    }
}
