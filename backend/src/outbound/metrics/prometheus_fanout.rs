//! Prometheus adapter for fan-out consumer metrics.
//!
//! Metrics are registered with a caller-provided registry so the embedding
//! process decides how they are exposed.

use async_trait::async_trait;
use prometheus::{Counter, CounterVec, Opts, Registry};

use crate::domain::ports::{DropReason, FanoutMetrics, FanoutMetricsError};

/// Prometheus-backed fan-out metrics recorder.
///
/// # Metric Specification
///
/// - `newsfeed_fanout_events_total{outcome}`: `delivered`, `malformed`, or
///   `retries_exhausted`
/// - `newsfeed_fanout_feed_entries_total`: feed entries written
/// - `newsfeed_fanout_retries_total`: failed attempts that were retried
/// - `newsfeed_fanout_rebalances_total`: partition assignment changes
pub struct PrometheusFanoutMetrics {
    events_total: CounterVec,
    feed_entries_total: Counter,
    retries_total: Counter,
    rebalances_total: Counter,
}

impl PrometheusFanoutMetrics {
    /// Create and register metrics with the given registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric with the same name is already
    /// registered.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let events_total = CounterVec::new(
            Opts::new(
                "newsfeed_fanout_events_total",
                "Post events processed by outcome",
            ),
            &["outcome"],
        )?;
        let feed_entries_total = Counter::new(
            "newsfeed_fanout_feed_entries_total",
            "Feed entries written by fan-out",
        )?;
        let retries_total = Counter::new(
            "newsfeed_fanout_retries_total",
            "Fan-out attempts that failed and were retried",
        )?;
        let rebalances_total = Counter::new(
            "newsfeed_fanout_rebalances_total",
            "Partition assignment changes seen by the consumer",
        )?;
        registry.register(Box::new(events_total.clone()))?;
        registry.register(Box::new(feed_entries_total.clone()))?;
        registry.register(Box::new(retries_total.clone()))?;
        registry.register(Box::new(rebalances_total.clone()))?;
        Ok(Self {
            events_total,
            feed_entries_total,
            retries_total,
            rebalances_total,
        })
    }

    fn record_event(&self, outcome: &str) {
        self.events_total.with_label_values(&[outcome]).inc();
    }
}

#[async_trait]
impl FanoutMetrics for PrometheusFanoutMetrics {
    async fn record_delivered(&self, recipients: usize) -> Result<(), FanoutMetricsError> {
        self.record_event("delivered");
        self.feed_entries_total.inc_by(recipients as f64);
        Ok(())
    }

    async fn record_retry(&self) -> Result<(), FanoutMetricsError> {
        self.retries_total.inc();
        Ok(())
    }

    async fn record_dropped(&self, reason: DropReason) -> Result<(), FanoutMetricsError> {
        match reason {
            DropReason::Malformed => self.record_event("malformed"),
            DropReason::RetriesExhausted => self.record_event("retries_exhausted"),
        }
        Ok(())
    }

    async fn record_rebalance(&self) -> Result<(), FanoutMetricsError> {
        self.rebalances_total.inc();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_metric() {
        let registry = Registry::new();
        let metrics =
            PrometheusFanoutMetrics::new(&registry).expect("metric registration should succeed");
        metrics.record_event("delivered");

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.name().to_owned())
            .collect();
        assert!(names.contains(&"newsfeed_fanout_events_total".to_owned()));
        assert!(names.contains(&"newsfeed_fanout_retries_total".to_owned()));
    }

    #[test]
    fn double_registration_fails() {
        let registry = Registry::new();
        PrometheusFanoutMetrics::new(&registry).expect("first registration");
        assert!(PrometheusFanoutMetrics::new(&registry).is_err());
    }

    #[tokio::test]
    async fn drop_reasons_use_distinct_labels() {
        let registry = Registry::new();
        let metrics =
            PrometheusFanoutMetrics::new(&registry).expect("metric registration should succeed");

        metrics
            .record_dropped(DropReason::Malformed)
            .await
            .expect("recording should succeed");
        metrics
            .record_dropped(DropReason::RetriesExhausted)
            .await
            .expect("recording should succeed");
        metrics
            .record_dropped(DropReason::RetriesExhausted)
            .await
            .expect("recording should succeed");

        let exhausted = metrics
            .events_total
            .with_label_values(&["retries_exhausted"]);
        assert_eq!(exhausted.get() as u64, 2);
        let malformed = metrics.events_total.with_label_values(&["malformed"]);
        assert_eq!(malformed.get() as u64, 1);
    }

    #[tokio::test]
    async fn delivery_counts_feed_entries() {
        let registry = Registry::new();
        let metrics =
            PrometheusFanoutMetrics::new(&registry).expect("metric registration should succeed");

        metrics
            .record_delivered(4)
            .await
            .expect("recording should succeed");

        assert_eq!(metrics.feed_entries_total.get() as u64, 4);
        assert_eq!(
            metrics.events_total.with_label_values(&["delivered"]).get() as u64,
            1
        );
    }
}
