//! In-process post event log with consumer groups.
//!
//! Mirrors the PostgreSQL log's delivery contract without a database: keyed
//! records are routed by [`Partitioner`], each partition is assigned to one
//! member of a group at a time, and committed offsets survive membership
//! changes. Useful for tests and single-process development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use crate::domain::ports::{
    Delivery, EventSourceError, PostCreatedEvent, PostEventPublisher, PostEventRecord,
    PostEventSource, PostEventSubscription, PublishError, RecordPosition,
};

use super::partitioner::Partitioner;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: String,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Sorted member ids; partition `p` belongs to `members[p % len]`.
    members: Vec<String>,
    /// Next undelivered offset per partition.
    committed: HashMap<u32, u64>,
    generation: u64,
}

impl GroupState {
    fn owner_of(&self, partition: u32) -> Option<&str> {
        if self.members.is_empty() {
            return None;
        }
        let index = usize::try_from(partition).unwrap_or(0) % self.members.len();
        self.members.get(index).map(String::as_str)
    }

    fn assignment(&self, member: &str, partitions: u32) -> Vec<u32> {
        (0..partitions)
            .filter(|partition| self.owner_of(*partition) == Some(member))
            .collect()
    }

    fn join(&mut self, member: &str) {
        if let Err(slot) = self.members.binary_search_by(|probe| probe.as_str().cmp(member)) {
            self.members.insert(slot, member.to_owned());
        }
        self.generation += 1;
    }

    fn leave(&mut self, member: &str) {
        if let Ok(slot) = self.members.binary_search_by(|probe| probe.as_str().cmp(member)) {
            self.members.remove(slot);
            self.generation += 1;
        }
    }
}

#[derive(Debug)]
struct LogState {
    partitions: Vec<Vec<StoredRecord>>,
    groups: HashMap<String, GroupState>,
}

struct LogInner {
    partitioner: Partitioner,
    poll_interval: Duration,
    max_batch: usize,
    unavailable: AtomicBool,
    state: Mutex<LogState>,
    changed: Notify,
}

impl LogInner {
    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// In-memory partitioned log implementing both the publisher and source
/// ports. Clones share the same log.
#[derive(Clone)]
pub struct InMemoryPostLog {
    inner: Arc<LogInner>,
}

impl InMemoryPostLog {
    /// A log with `partitions` partitions, a 50 ms poll interval, and
    /// batches of up to 64 records.
    pub fn new(partitions: u32) -> Self {
        Self::with_settings(partitions, Duration::from_millis(50), 64)
    }

    /// A log with explicit poll interval and batch size.
    pub fn with_settings(partitions: u32, poll_interval: Duration, max_batch: usize) -> Self {
        let partitioner = Partitioner::new(partitions);
        let slots = usize::try_from(partitioner.partitions()).unwrap_or(1);
        Self {
            inner: Arc::new(LogInner {
                partitioner,
                poll_interval,
                max_batch: max_batch.max(1),
                unavailable: AtomicBool::new(false),
                state: Mutex::new(LogState {
                    partitions: vec![Vec::new(); slots],
                    groups: HashMap::new(),
                }),
                changed: Notify::new(),
            }),
        }
    }

    /// Make publishing and subscribing fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Append raw bytes under `key`, bypassing event encoding.
    pub fn append_raw(&self, key: &str, payload: Vec<u8>) -> RecordPosition {
        let partition = self.inner.partitioner.partition_for(key);
        let offset = {
            let mut state = self.inner.lock();
            let index = usize::try_from(partition).unwrap_or(0);
            let Some(records) = state.partitions.get_mut(index) else {
                return RecordPosition {
                    partition,
                    offset: 0,
                };
            };
            records.push(StoredRecord {
                key: key.to_owned(),
                payload,
            });
            u64::try_from(records.len() - 1).unwrap_or(u64::MAX)
        };
        self.inner.changed.notify_waiters();
        RecordPosition { partition, offset }
    }

    /// Next undelivered offset committed by `group` for `partition`.
    pub fn committed_offset(&self, group: &str, partition: u32) -> Option<u64> {
        self.inner
            .lock()
            .groups
            .get(group)
            .and_then(|state| state.committed.get(&partition).copied())
    }

    /// Current members of `group`, sorted.
    pub fn members(&self, group: &str) -> Vec<String> {
        self.inner
            .lock()
            .groups
            .get(group)
            .map(|state| state.members.clone())
            .unwrap_or_default()
    }

    /// Partition `key` routes to.
    pub fn partition_for(&self, key: &str) -> u32 {
        self.inner.partitioner.partition_for(key)
    }
}

#[async_trait]
impl PostEventPublisher for InMemoryPostLog {
    async fn publish(&self, event: &PostCreatedEvent) -> Result<RecordPosition, PublishError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(PublishError::unavailable("in-memory log marked unavailable"));
        }
        let payload = event
            .to_payload()
            .map_err(|err| PublishError::serialization(err.to_string()))?;
        Ok(self.append_raw(&event.partition_key(), payload))
    }
}

#[async_trait]
impl PostEventSource for InMemoryPostLog {
    async fn subscribe(
        &self,
        group: &str,
        member: &str,
    ) -> Result<Box<dyn PostEventSubscription>, EventSourceError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(EventSourceError::unavailable(
                "in-memory log marked unavailable",
            ));
        }
        let (generation, assigned) = {
            let mut state = self.inner.lock();
            let group_state = state.groups.entry(group.to_owned()).or_default();
            group_state.join(member);
            (
                group_state.generation,
                group_state.assignment(member, self.inner.partitioner.partitions()),
            )
        };
        self.inner.changed.notify_waiters();
        debug!(group, member, partitions = ?assigned, "joined in-memory consumer group");

        let mut subscription = InMemorySubscription {
            log: Arc::clone(&self.inner),
            group: group.to_owned(),
            member: member.to_owned(),
            generation,
            positions: HashMap::new(),
            closed: false,
        };
        subscription.reset_positions(&assigned);
        Ok(Box::new(subscription))
    }
}

struct InMemorySubscription {
    log: Arc<LogInner>,
    group: String,
    member: String,
    generation: u64,
    /// Next offset to fetch for each owned partition.
    positions: HashMap<u32, u64>,
    closed: bool,
}

impl InMemorySubscription {
    fn reset_positions(&mut self, assigned: &[u32]) {
        let state = self.log.lock();
        let committed = state.groups.get(&self.group).map(|group| &group.committed);
        self.positions = assigned
            .iter()
            .map(|partition| {
                let offset = committed
                    .and_then(|offsets| offsets.get(partition).copied())
                    .unwrap_or(0);
                (*partition, offset)
            })
            .collect();
    }

    /// Report an assignment change or fetch the next batch.
    fn try_deliver(&mut self) -> Option<Delivery> {
        let partitions = self.log.partitioner.partitions();
        let reassigned = {
            let state = self.log.lock();
            match state.groups.get(&self.group) {
                Some(group) if group.generation != self.generation => {
                    Some((group.generation, group.assignment(&self.member, partitions)))
                }
                _ => None,
            }
        };
        if let Some((generation, assigned)) = reassigned {
            self.generation = generation;
            let previous = {
                let mut owned: Vec<u32> = self.positions.keys().copied().collect();
                owned.sort_unstable();
                owned
            };
            self.reset_positions(&assigned);
            if previous != assigned {
                return Some(Delivery::Rebalanced { assigned });
            }
        }

        let mut batch = Vec::new();
        let state = self.log.lock();
        let mut owned: Vec<u32> = self.positions.keys().copied().collect();
        owned.sort_unstable();
        for partition in owned {
            let Some(next) = self.positions.get_mut(&partition) else {
                continue;
            };
            let records = usize::try_from(partition)
                .ok()
                .and_then(|index| state.partitions.get(index));
            let Some(records) = records else { continue };
            let start = usize::try_from(*next).unwrap_or(usize::MAX);
            for (index, record) in records.iter().enumerate().skip(start) {
                if batch.len() >= self.log.max_batch {
                    break;
                }
                let offset = u64::try_from(index).unwrap_or(u64::MAX);
                batch.push(PostEventRecord {
                    position: RecordPosition { partition, offset },
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                });
                *next = offset + 1;
            }
        }
        (!batch.is_empty()).then_some(Delivery::Records(batch))
    }

    fn leave(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        {
            let mut state = self.log.lock();
            if let Some(group) = state.groups.get_mut(&self.group) {
                group.leave(&self.member);
            }
        }
        self.log.changed.notify_waiters();
    }
}

#[async_trait]
impl PostEventSubscription for InMemorySubscription {
    async fn poll(&mut self) -> Result<Delivery, EventSourceError> {
        if self.closed {
            return Err(EventSourceError::closed());
        }
        let log = Arc::clone(&self.log);
        let notified = log.changed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(delivery) = self.try_deliver() {
            return Ok(delivery);
        }
        if tokio::time::timeout(self.log.poll_interval, notified)
            .await
            .is_err()
        {
            return Ok(Delivery::Idle);
        }
        Ok(self.try_deliver().unwrap_or(Delivery::Idle))
    }

    async fn commit(&mut self, position: RecordPosition) -> Result<(), EventSourceError> {
        if self.closed {
            return Err(EventSourceError::closed());
        }
        let mut state = self.log.lock();
        let Some(group) = state.groups.get_mut(&self.group) else {
            return Err(EventSourceError::lost_claim(position.partition));
        };
        if group.owner_of(position.partition) != Some(self.member.as_str()) {
            return Err(EventSourceError::lost_claim(position.partition));
        }
        let next = group.committed.entry(position.partition).or_insert(0);
        *next = (*next).max(position.offset + 1);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EventSourceError> {
        self.leave();
        debug!(group = %self.group, member = %self.member, "left in-memory consumer group");
        Ok(())
    }
}

impl Drop for InMemorySubscription {
    fn drop(&mut self) {
        self.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Post, PostContent, PostId, UserId};
    use rstest::rstest;

    fn event(post: i64, author: i64, created_at: i64) -> PostCreatedEvent {
        PostCreatedEvent::new(Post {
            id: PostId::new(post).expect("valid id"),
            author_id: UserId::new(author).expect("valid id"),
            content: PostContent::new("hello").expect("valid content"),
            created_at,
        })
    }

    fn records(delivery: Delivery) -> Vec<PostEventRecord> {
        match delivery {
            Delivery::Records(records) => records,
            other => panic!("expected records, got {other:?}"),
        }
    }

    #[rstest]
    #[tokio::test]
    async fn one_author_stays_in_order_on_one_partition() {
        let log = InMemoryPostLog::with_settings(4, Duration::from_millis(5), 10);
        for post in 1..=3 {
            log.publish(&event(post, 2, 100 + post)).await.expect("publish");
        }
        let mut subscription = log.subscribe("feeds", "solo").await.expect("subscribe");

        let delivered = records(subscription.poll().await.expect("poll"));
        let offsets: Vec<u64> = delivered.iter().map(|record| record.position.offset).collect();
        assert_eq!(offsets, vec![0, 1, 2]);
        assert!(
            delivered
                .iter()
                .all(|record| record.position.partition == log.partition_for("2"))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn uncommitted_records_are_redelivered_to_the_next_owner() {
        let log = InMemoryPostLog::with_settings(1, Duration::from_millis(5), 10);
        log.publish(&event(1, 2, 100)).await.expect("publish");
        log.publish(&event(2, 2, 101)).await.expect("publish");

        let mut first = log.subscribe("feeds", "a").await.expect("subscribe");
        let delivered = records(first.poll().await.expect("poll"));
        let first_position = delivered.first().expect("record").position;
        first.commit(first_position).await.expect("commit");
        first.close().await.expect("close");

        let mut second = log.subscribe("feeds", "b").await.expect("subscribe");
        let redelivered = records(second.poll().await.expect("poll"));
        assert_eq!(
            redelivered.iter().map(|r| r.position.offset).collect::<Vec<_>>(),
            vec![1]
        );
        assert_eq!(log.committed_offset("feeds", 0), Some(1));
    }

    #[rstest]
    #[tokio::test]
    async fn a_joining_member_rebalances_and_takes_over_partitions() {
        let log = InMemoryPostLog::with_settings(2, Duration::from_millis(5), 10);
        let mut a = log.subscribe("feeds", "a").await.expect("subscribe");
        let _b = log.subscribe("feeds", "b").await.expect("subscribe");

        assert_eq!(
            a.poll().await.expect("poll"),
            Delivery::Rebalanced { assigned: vec![0] }
        );
        assert_eq!(
            a.commit(RecordPosition {
                partition: 1,
                offset: 0
            })
            .await,
            Err(EventSourceError::lost_claim(1_u32))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn idle_polls_time_out() {
        let log = InMemoryPostLog::with_settings(1, Duration::from_millis(5), 10);
        let mut subscription = log.subscribe("feeds", "a").await.expect("subscribe");
        assert_eq!(subscription.poll().await.expect("poll"), Delivery::Idle);
    }

    #[rstest]
    #[tokio::test]
    async fn closing_leaves_the_group() {
        let log = InMemoryPostLog::new(1);
        let mut subscription = log.subscribe("feeds", "a").await.expect("subscribe");
        assert_eq!(log.members("feeds"), vec!["a".to_owned()]);

        subscription.close().await.expect("close");
        assert!(log.members("feeds").is_empty());
        assert_eq!(
            subscription.poll().await,
            Err(EventSourceError::closed())
        );
    }

    #[rstest]
    #[tokio::test]
    async fn unavailable_log_rejects_publishes() {
        let log = InMemoryPostLog::new(1);
        log.set_unavailable(true);
        let error = log.publish(&event(1, 2, 100)).await.expect_err("unavailable");
        assert!(matches!(error, PublishError::Unavailable { .. }));
    }
}
