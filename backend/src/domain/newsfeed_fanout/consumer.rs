//! Consumer loop that drives [`NewsfeedFanout`] from the post event log.
//!
//! Lifecycle: `Initializing → Ready → Consuming → (Rebalancing →
//! Consuming)* → Stopped`. Readiness is reported once through a oneshot
//! channel; the current state is published on a `watch` channel.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::Error;
use crate::domain::ports::{
    Delivery, DropReason, EventSourceError, FanoutMetrics, PostCreatedEvent, PostEventRecord,
    PostEventSource, PostEventSubscription, RecordPosition,
};

use super::runtime::{BackoffJitter, FanoutRuntime, RetrySleeper, retry_base_delay};
use super::NewsfeedFanout;

/// Observable consumer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Joining the consumer group.
    Initializing,
    /// Subscribed; readiness has been signalled.
    Ready,
    /// Polling and processing records.
    Consuming,
    /// Handling a partition assignment change.
    Rebalancing,
    /// The subscription is closed.
    Stopped,
}

/// Group membership, retry, and shutdown settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutConsumerConfig {
    /// Consumer group name shared by every worker process.
    pub group: String,
    /// Identity of this member within the group.
    pub member: String,
    /// Fan-out attempts per record, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Cap for retry delays.
    pub max_backoff: Duration,
    /// How long an in-flight record may keep running after cancellation.
    pub shutdown_grace: Duration,
}

impl Default for FanoutConsumerConfig {
    fn default() -> Self {
        Self {
            group: "newsfeed-fanout".to_owned(),
            member: format!("fanout-{}", Uuid::new_v4()),
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Counters accumulated over one [`FanoutConsumer::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsumerReport {
    /// Records delivered to every follower feed.
    pub processed: u64,
    /// Records committed without full delivery.
    pub dropped: u64,
    /// Partition assignment changes observed.
    pub rebalances: u64,
}

enum RecordOutcome {
    Delivered,
    Dropped,
}

enum CommitOutcome {
    Committed,
    LostClaim(u32),
    /// Shutdown started while the log was unavailable.
    Abandoned,
}

/// Long-running consumer of `PostCreated` events.
pub struct FanoutConsumer {
    source: Arc<dyn PostEventSource>,
    fanout: Arc<NewsfeedFanout>,
    metrics: Arc<dyn FanoutMetrics>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn RetrySleeper>,
    jitter: Arc<dyn BackoffJitter>,
    config: FanoutConsumerConfig,
    state: watch::Sender<ConsumerState>,
}

impl FanoutConsumer {
    /// Build a consumer using Tokio sleeps and attempt-seeded jitter.
    pub fn new(
        source: Arc<dyn PostEventSource>,
        fanout: Arc<NewsfeedFanout>,
        metrics: Arc<dyn FanoutMetrics>,
        clock: Arc<dyn Clock>,
        config: FanoutConsumerConfig,
    ) -> Self {
        Self::with_runtime(
            source,
            fanout,
            metrics,
            clock,
            FanoutRuntime::default(),
            config,
        )
    }

    /// Build a consumer with injected runtime abstractions.
    pub fn with_runtime(
        source: Arc<dyn PostEventSource>,
        fanout: Arc<NewsfeedFanout>,
        metrics: Arc<dyn FanoutMetrics>,
        clock: Arc<dyn Clock>,
        runtime: FanoutRuntime,
        config: FanoutConsumerConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Initializing);
        Self {
            source,
            fanout,
            metrics,
            clock,
            sleeper: runtime.sleeper,
            jitter: runtime.jitter,
            config,
            state,
        }
    }

    /// Watch the lifecycle state.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "fan-out consumer state changed");
        }
    }

    /// Join the consumer group and process records until `cancel` fires.
    ///
    /// `ready` is completed once the subscription is established. The
    /// subscription is closed, releasing partition claims, before this
    /// returns.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        ready: oneshot::Sender<()>,
    ) -> Result<ConsumerReport, Error> {
        self.set_state(ConsumerState::Initializing);
        let mut subscription = match self
            .source
            .subscribe(&self.config.group, &self.config.member)
            .await
        {
            Ok(subscription) => subscription,
            Err(err) => {
                self.set_state(ConsumerState::Stopped);
                return Err(map_source_error(err));
            }
        };

        self.set_state(ConsumerState::Ready);
        if ready.send(()).is_err() {
            debug!("readiness receiver dropped before the consumer became ready");
        }
        info!(
            group = %self.config.group,
            member = %self.config.member,
            "fan-out consumer ready"
        );

        let mut report = ConsumerReport::default();
        self.set_state(ConsumerState::Consuming);
        let result = self
            .consume(subscription.as_mut(), &cancel, &mut report)
            .await;

        if let Err(err) = subscription.close().await {
            warn!(error = %err, "failed to close post event subscription");
        }
        self.set_state(ConsumerState::Stopped);
        info!(
            processed = report.processed,
            dropped = report.dropped,
            rebalances = report.rebalances,
            "fan-out consumer stopped"
        );
        result.map(|()| report)
    }

    async fn consume(
        &self,
        subscription: &mut dyn PostEventSubscription,
        cancel: &CancellationToken,
        report: &mut ConsumerReport,
    ) -> Result<(), Error> {
        let mut poll_failures: u32 = 0;
        loop {
            let delivery = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                delivery = subscription.poll() => delivery,
            };

            match delivery {
                Ok(Delivery::Idle) => poll_failures = 0,
                Ok(Delivery::Rebalanced { assigned }) => {
                    poll_failures = 0;
                    self.set_state(ConsumerState::Rebalancing);
                    report.rebalances += 1;
                    let _ = self.metrics.record_rebalance().await;
                    info!(partitions = ?assigned, "partition assignment changed");
                    self.set_state(ConsumerState::Consuming);
                }
                Ok(Delivery::Records(records)) => {
                    poll_failures = 0;
                    let keep_going = self
                        .consume_batch(subscription, records, cancel, report)
                        .await?;
                    if !keep_going {
                        return Ok(());
                    }
                }
                Err(EventSourceError::Unavailable { message }) => {
                    poll_failures = poll_failures.saturating_add(1);
                    let delay = self.retry_delay(poll_failures);
                    warn!(
                        attempt = poll_failures,
                        delay_ms = millis(delay),
                        %message,
                        "post event log unavailable"
                    );
                    if !self.back_off(delay, cancel).await {
                        return Ok(());
                    }
                }
                Err(err) => return Err(map_source_error(err)),
            }
        }
    }

    /// Process and commit records in order. Returns `false` once shutdown
    /// has been requested.
    async fn consume_batch(
        &self,
        subscription: &mut dyn PostEventSubscription,
        records: Vec<PostEventRecord>,
        cancel: &CancellationToken,
        report: &mut ConsumerReport,
    ) -> Result<bool, Error> {
        let mut lost_partitions: HashSet<u32> = HashSet::new();
        for record in records {
            let position = record.position;
            if lost_partitions.contains(&position.partition) {
                continue;
            }
            if cancel.is_cancelled() {
                return Ok(false);
            }

            let Some(outcome) = self.process_with_grace(&record, cancel).await else {
                return Ok(false);
            };
            match outcome {
                RecordOutcome::Delivered => report.processed += 1,
                RecordOutcome::Dropped => report.dropped += 1,
            }

            match self.commit_with_backoff(subscription, position, cancel).await? {
                CommitOutcome::Committed => {}
                CommitOutcome::LostClaim(partition) => {
                    warn!(
                        partition,
                        offset = position.offset,
                        "partition claim lost; later records are left for the new owner"
                    );
                    lost_partitions.insert(partition);
                }
                CommitOutcome::Abandoned => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Commit `position`, backing off while the log is unavailable. The
    /// record stays uncommitted if shutdown starts first.
    async fn commit_with_backoff(
        &self,
        subscription: &mut dyn PostEventSubscription,
        position: RecordPosition,
        cancel: &CancellationToken,
    ) -> Result<CommitOutcome, Error> {
        let mut failures: u32 = 0;
        loop {
            match subscription.commit(position).await {
                Ok(()) => return Ok(CommitOutcome::Committed),
                Err(EventSourceError::LostClaim { partition }) => {
                    return Ok(CommitOutcome::LostClaim(partition));
                }
                Err(EventSourceError::Unavailable { message }) => {
                    failures = failures.saturating_add(1);
                    let delay = self.retry_delay(failures);
                    warn!(
                        partition = position.partition,
                        offset = position.offset,
                        attempt = failures,
                        delay_ms = millis(delay),
                        %message,
                        "post event commit failed; retrying"
                    );
                    if !self.back_off(delay, cancel).await {
                        return Ok(CommitOutcome::Abandoned);
                    }
                }
                Err(err) => return Err(map_source_error(err)),
            }
        }
    }

    /// Sleep for `delay`. Returns `false` when cancellation wins.
    async fn back_off(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            () = self.sleeper.sleep(delay) => true,
        }
    }

    /// Run one record to completion, allowing `shutdown_grace` after
    /// cancellation. `None` means the record was abandoned uncommitted.
    async fn process_with_grace(
        &self,
        record: &PostEventRecord,
        cancel: &CancellationToken,
    ) -> Option<RecordOutcome> {
        let work = self.process_record(record);
        tokio::pin!(work);
        tokio::select! {
            biased;
            outcome = &mut work => Some(outcome),
            () = cancel.cancelled() => {
                if let Ok(outcome) = tokio::time::timeout(self.config.shutdown_grace, &mut work).await {
                    Some(outcome)
                } else {
                    warn!(
                        partition = record.position.partition,
                        offset = record.position.offset,
                        "shutdown grace elapsed; record left uncommitted"
                    );
                    None
                }
            }
        }
    }

    async fn process_record(&self, record: &PostEventRecord) -> RecordOutcome {
        let position = record.position;
        let event = match PostCreatedEvent::from_payload(&record.payload) {
            Ok(event) => event,
            Err(err) => {
                error!(
                    partition = position.partition,
                    offset = position.offset,
                    key = %record.key,
                    error = %err,
                    "skipping malformed post event"
                );
                let _ = self.metrics.record_dropped(DropReason::Malformed).await;
                return RecordOutcome::Dropped;
            }
        };

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.fanout.fan_out(&event).await {
                Ok(outcome) => {
                    let _ = self.metrics.record_delivered(outcome.recipients).await;
                    return RecordOutcome::Delivered;
                }
                Err(err) if attempt < max_attempts => {
                    warn!(
                        post_id = %event.post.id,
                        attempt,
                        error = %err,
                        "fan-out attempt failed; retrying"
                    );
                    let _ = self.metrics.record_retry().await;
                    self.sleeper.sleep(self.retry_delay(attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        post_id = %event.post.id,
                        partition = position.partition,
                        offset = position.offset,
                        attempts = attempt,
                        error = %err,
                        "dropping post event after exhausting retries"
                    );
                    let _ = self
                        .metrics
                        .record_dropped(DropReason::RetriesExhausted)
                        .await;
                    return RecordOutcome::Dropped;
                }
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = retry_base_delay(
            self.config.initial_backoff,
            self.config.max_backoff,
            attempt,
        );
        self.jitter.jittered_delay(base, attempt, self.clock.utc())
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

fn map_source_error(error: EventSourceError) -> Error {
    Error::storage(format!("post event log failure: {error}"))
}
