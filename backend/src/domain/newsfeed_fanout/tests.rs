//! Unit tests for fan-out delivery and the consumer loop.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pagination::{Cursor, PageRequest};
use rstest::rstest;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::domain::ports::{
    CacheError, Delivery, DropReason, EventSourceError, FanoutMetrics, FollowPersistenceError,
    MockFanoutMetrics, MockFeedCache, MockFollowRepository, NoOpFanoutMetrics, PostEventRecord,
    PostEventSource, PostEventSubscription, RecordPosition,
};
use crate::domain::{ErrorCode, FollowEdge, FollowPair, Post, PostContent, PostId};
use crate::test_support::clock::MutableClock;
use crate::test_support::retry::{ImmediateSleeper, NoJitter, RecordingSleeper};

fn id(raw: i64) -> UserId {
    UserId::new(raw).expect("valid id")
}

fn post(raw: i64, author: i64, created_at: i64) -> Post {
    Post {
        id: PostId::new(raw).expect("valid id"),
        author_id: id(author),
        content: PostContent::new(format!("post {raw}")).expect("valid content"),
        created_at,
    }
}

fn edge(follower: i64, following: i64, followed_at: i64) -> FollowEdge {
    FollowEdge {
        follower_id: id(follower),
        following_id: id(following),
        followed_at,
        removed: false,
    }
}

fn record(partition: u32, offset: u64, payload: Vec<u8>) -> PostEventRecord {
    PostEventRecord {
        position: RecordPosition { partition, offset },
        key: "2".to_owned(),
        payload,
    }
}

fn post_record(partition: u32, offset: u64, post_id: i64) -> PostEventRecord {
    let payload = PostCreatedEvent::new(post(post_id, 2, 200))
        .to_payload()
        .expect("encode event");
    record(partition, offset, payload)
}

fn fanout_with(
    follows: impl FollowRepository + 'static,
    feed: MockFeedCache,
    config: NewsfeedFanoutConfig,
) -> Arc<NewsfeedFanout> {
    Arc::new(NewsfeedFanout::new(Arc::new(follows), Arc::new(feed), config))
}

/// Follow store with a single follower (user 1) and a feed that accepts
/// every write.
fn healthy_fanout() -> Arc<NewsfeedFanout> {
    let mut follows = MockFollowRepository::new();
    follows
        .expect_list_followers()
        .returning(|_, _| Ok(vec![edge(1, 2, 100)]));
    let mut feed = MockFeedCache::new();
    feed.expect_set_post().returning(|_| Ok(()));
    feed.expect_append_feed_entry().returning(|_, _, _| Ok(()));
    fanout_with(follows, feed, NewsfeedFanoutConfig::default())
}

#[rstest]
#[tokio::test]
async fn fan_out_pages_through_followers_in_batches() {
    let mut follows = MockFollowRepository::new();
    follows
        .expect_list_followers()
        .withf(|author, request| author.get() == 2 && request.cursor().is_none())
        .times(1)
        .returning(|_, _| Ok(vec![edge(5, 2, 300), edge(3, 2, 200)]));
    follows
        .expect_list_followers()
        .withf(|_, request| request.cursor() == Some(Cursor::after_item(200, 3)))
        .times(1)
        .returning(|_, _| Ok(vec![edge(4, 2, 100)]));

    let mut feed = MockFeedCache::new();
    feed.expect_set_post()
        .withf(|cached| cached.id.get() == 50)
        .times(1)
        .returning(|_| Ok(()));
    let appended: Arc<Mutex<Vec<Vec<i64>>>> = Arc::default();
    let sink = Arc::clone(&appended);
    feed.expect_append_feed_entry()
        .withf(|_, entry, max| {
            entry.post_id.get() == 50 && entry.created_at == 200 && *max == Some(10)
        })
        .times(2)
        .returning(move |recipients, _, _| {
            sink.lock()
                .expect("sink")
                .push(recipients.iter().map(|user| user.get()).collect());
            Ok(())
        });

    let fanout = fanout_with(
        follows,
        feed,
        NewsfeedFanoutConfig {
            batch_size: 2,
            max_feed_entries: Some(10),
        },
    );
    let outcome = fanout
        .fan_out(&PostCreatedEvent::new(post(50, 2, 200)))
        .await
        .expect("fan-out succeeds");

    assert_eq!(
        outcome,
        FanoutOutcome {
            recipients: 3,
            batches: 2
        }
    );
    assert_eq!(
        *appended.lock().expect("sink"),
        vec![vec![5, 3], vec![4]]
    );
}

#[rstest]
#[tokio::test]
async fn fan_out_without_followers_still_caches_the_post() {
    let mut follows = MockFollowRepository::new();
    follows
        .expect_list_followers()
        .times(1)
        .returning(|_, _| Ok(Vec::new()));
    let mut feed = MockFeedCache::new();
    feed.expect_set_post().times(1).returning(|_| Ok(()));
    feed.expect_append_feed_entry().never();

    let outcome = fanout_with(follows, feed, NewsfeedFanoutConfig::default())
        .fan_out(&PostCreatedEvent::new(post(50, 2, 200)))
        .await
        .expect("fan-out succeeds");
    assert_eq!(outcome.recipients, 0);
}

#[rstest]
#[tokio::test]
async fn fan_out_reports_feed_write_failures() {
    let mut follows = MockFollowRepository::new();
    follows
        .expect_list_followers()
        .returning(|_, _| Ok(vec![edge(1, 2, 100)]));
    let mut feed = MockFeedCache::new();
    feed.expect_set_post().returning(|_| Ok(()));
    feed.expect_append_feed_entry()
        .returning(|_, _, _| Err(CacheError::backend("READONLY")));

    let error = fanout_with(follows, feed, NewsfeedFanoutConfig::default())
        .fan_out(&PostCreatedEvent::new(post(50, 2, 200)))
        .await
        .expect_err("feed write fails");
    assert_eq!(error.code(), ErrorCode::StorageFailure);
}

#[derive(Default)]
struct SubscriptionLog {
    commits: Vec<RecordPosition>,
    closed: bool,
}

struct ScriptedSubscription {
    script: VecDeque<Result<Delivery, EventSourceError>>,
    lost_partitions: HashSet<u32>,
    /// Commits rejected as unavailable before the log recovers.
    unavailable_commits: u32,
    log: Arc<Mutex<SubscriptionLog>>,
    cancel: CancellationToken,
}

#[async_trait]
impl PostEventSubscription for ScriptedSubscription {
    async fn poll(&mut self) -> Result<Delivery, EventSourceError> {
        if let Some(next) = self.script.pop_front() {
            return next;
        }
        self.cancel.cancel();
        Ok(Delivery::Idle)
    }

    async fn commit(&mut self, position: RecordPosition) -> Result<(), EventSourceError> {
        if self.lost_partitions.contains(&position.partition) {
            return Err(EventSourceError::lost_claim(position.partition));
        }
        if self.unavailable_commits > 0 {
            self.unavailable_commits -= 1;
            return Err(EventSourceError::unavailable("transient blip"));
        }
        self.log.lock().expect("log").commits.push(position);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EventSourceError> {
        self.log.lock().expect("log").closed = true;
        Ok(())
    }
}

struct OneShotSource(Mutex<Option<ScriptedSubscription>>);

#[async_trait]
impl PostEventSource for OneShotSource {
    async fn subscribe(
        &self,
        group: &str,
        _member: &str,
    ) -> Result<Box<dyn PostEventSubscription>, EventSourceError> {
        assert_eq!(group, "feeds");
        self.0
            .lock()
            .expect("source")
            .take()
            .map(|subscription| Box::new(subscription) as Box<dyn PostEventSubscription>)
            .ok_or_else(EventSourceError::closed)
    }
}

struct Harness {
    log: Arc<Mutex<SubscriptionLog>>,
    cancel: CancellationToken,
    source: Arc<OneShotSource>,
}

impl Harness {
    fn new(script: Vec<Result<Delivery, EventSourceError>>, lost_partitions: &[u32]) -> Self {
        let log: Arc<Mutex<SubscriptionLog>> = Arc::default();
        let cancel = CancellationToken::new();
        let subscription = ScriptedSubscription {
            script: script.into(),
            lost_partitions: lost_partitions.iter().copied().collect(),
            unavailable_commits: 0,
            log: Arc::clone(&log),
            cancel: cancel.clone(),
        };
        Self {
            log,
            cancel,
            source: Arc::new(OneShotSource(Mutex::new(Some(subscription)))),
        }
    }

    fn fail_next_commits(self, count: u32) -> Self {
        if let Some(subscription) = self.source.0.lock().expect("source").as_mut() {
            subscription.unavailable_commits = count;
        }
        self
    }

    fn consumer(
        &self,
        fanout: Arc<NewsfeedFanout>,
        metrics: impl FanoutMetrics + 'static,
        runtime: FanoutRuntime,
    ) -> FanoutConsumer {
        FanoutConsumer::with_runtime(
            self.source.clone(),
            fanout,
            Arc::new(metrics),
            Arc::new(MutableClock::at_epoch_seconds(1_700_000_000)),
            runtime,
            FanoutConsumerConfig {
                group: "feeds".to_owned(),
                member: "worker-a".to_owned(),
                max_attempts: 3,
                initial_backoff: Duration::from_millis(100),
                max_backoff: Duration::from_secs(1),
                shutdown_grace: Duration::from_millis(20),
            },
        )
    }

    fn commits(&self) -> Vec<RecordPosition> {
        self.log.lock().expect("log").commits.clone()
    }

    fn closed(&self) -> bool {
        self.log.lock().expect("log").closed
    }
}

fn immediate_runtime() -> FanoutRuntime {
    FanoutRuntime {
        sleeper: Arc::new(ImmediateSleeper),
        jitter: Arc::new(NoJitter),
    }
}

async fn run_to_completion(
    consumer: &FanoutConsumer,
    cancel: CancellationToken,
) -> (Result<ConsumerReport, Error>, bool) {
    let (ready_tx, ready_rx) = oneshot::channel();
    let report = timeout(Duration::from_secs(5), consumer.run(cancel, ready_tx))
        .await
        .expect("consumer finishes");
    (report, ready_rx.await.is_ok())
}

#[rstest]
#[tokio::test]
async fn consumer_delivers_commits_and_stops() {
    let harness = Harness::new(
        vec![
            Ok(Delivery::Rebalanced { assigned: vec![0] }),
            Ok(Delivery::Records(vec![post_record(0, 0, 50), post_record(0, 1, 51)])),
        ],
        &[],
    );
    let mut metrics = MockFanoutMetrics::new();
    metrics
        .expect_record_delivered()
        .withf(|recipients| *recipients == 1)
        .times(2)
        .returning(|_| Ok(()));
    metrics.expect_record_rebalance().times(1).returning(|| Ok(()));
    let consumer = harness.consumer(healthy_fanout(), metrics, immediate_runtime());
    let state = consumer.state();

    let (report, ready) = run_to_completion(&consumer, harness.cancel.clone()).await;

    assert!(ready);
    assert_eq!(
        report.expect("clean stop"),
        ConsumerReport {
            processed: 2,
            dropped: 0,
            rebalances: 1
        }
    );
    assert_eq!(
        harness.commits(),
        vec![
            RecordPosition { partition: 0, offset: 0 },
            RecordPosition { partition: 0, offset: 1 },
        ]
    );
    assert!(harness.closed());
    assert_eq!(*state.borrow(), ConsumerState::Stopped);
}

#[rstest]
#[tokio::test]
async fn repeated_rebalances_do_not_resignal_readiness() {
    let harness = Harness::new(
        vec![
            Ok(Delivery::Rebalanced { assigned: vec![0, 1] }),
            Ok(Delivery::Idle),
            Ok(Delivery::Rebalanced { assigned: vec![1] }),
        ],
        &[],
    );
    let consumer = harness.consumer(healthy_fanout(), NoOpFanoutMetrics, immediate_runtime());

    let (report, ready) = run_to_completion(&consumer, harness.cancel.clone()).await;

    assert!(ready);
    assert_eq!(report.expect("clean stop").rebalances, 2);
}

#[rstest]
#[tokio::test]
async fn malformed_events_are_committed_and_counted() {
    let harness = Harness::new(
        vec![Ok(Delivery::Records(vec![
            record(0, 0, b"not json".to_vec()),
            post_record(0, 1, 51),
        ]))],
        &[],
    );
    let mut metrics = MockFanoutMetrics::new();
    metrics
        .expect_record_dropped()
        .withf(|reason| *reason == DropReason::Malformed)
        .times(1)
        .returning(|_| Ok(()));
    metrics.expect_record_delivered().times(1).returning(|_| Ok(()));
    let consumer = harness.consumer(healthy_fanout(), metrics, immediate_runtime());

    let (report, _) = run_to_completion(&consumer, harness.cancel.clone()).await;

    let report = report.expect("clean stop");
    assert_eq!((report.processed, report.dropped), (1, 1));
    assert_eq!(harness.commits().len(), 2);
}

#[rstest]
#[tokio::test]
async fn exhausted_retries_drop_and_commit_the_record() {
    let harness = Harness::new(
        vec![Ok(Delivery::Records(vec![post_record(3, 7, 50)]))],
        &[],
    );
    let mut follows = MockFollowRepository::new();
    follows
        .expect_list_followers()
        .times(3)
        .returning(|_, _| Err(FollowPersistenceError::connection("pool timed out")));
    let mut feed = MockFeedCache::new();
    feed.expect_set_post().returning(|_| Ok(()));
    let fanout = fanout_with(follows, feed, NewsfeedFanoutConfig::default());

    let mut metrics = MockFanoutMetrics::new();
    metrics.expect_record_retry().times(2).returning(|| Ok(()));
    metrics
        .expect_record_dropped()
        .withf(|reason| *reason == DropReason::RetriesExhausted)
        .times(1)
        .returning(|_| Ok(()));
    let sleeper = Arc::new(RecordingSleeper::default());
    let consumer = harness.consumer(
        fanout,
        metrics,
        FanoutRuntime {
            sleeper: sleeper.clone(),
            jitter: Arc::new(NoJitter),
        },
    );

    let (report, _) = run_to_completion(&consumer, harness.cancel.clone()).await;

    assert_eq!(report.expect("clean stop").dropped, 1);
    assert_eq!(
        harness.commits(),
        vec![RecordPosition {
            partition: 3,
            offset: 7
        }]
    );
    assert_eq!(
        sleeper.delays(),
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
}

#[rstest]
#[tokio::test]
async fn lost_claims_skip_the_rest_of_that_partition() {
    let harness = Harness::new(
        vec![Ok(Delivery::Records(vec![
            post_record(1, 0, 50),
            post_record(1, 1, 51),
            post_record(2, 0, 52),
        ]))],
        &[1],
    );
    let consumer = harness.consumer(healthy_fanout(), NoOpFanoutMetrics, immediate_runtime());

    let (report, _) = run_to_completion(&consumer, harness.cancel.clone()).await;

    assert_eq!(report.expect("clean stop").processed, 2);
    assert_eq!(
        harness.commits(),
        vec![RecordPosition {
            partition: 2,
            offset: 0
        }]
    );
}

#[rstest]
#[tokio::test]
async fn unavailable_log_is_retried_until_cancelled() {
    let harness = Harness::new(
        vec![
            Err(EventSourceError::unavailable("connection refused")),
            Err(EventSourceError::unavailable("connection refused")),
            Ok(Delivery::Records(vec![post_record(0, 0, 50)])),
        ],
        &[],
    );
    let sleeper = Arc::new(RecordingSleeper::default());
    let consumer = harness.consumer(
        healthy_fanout(),
        NoOpFanoutMetrics,
        FanoutRuntime {
            sleeper: sleeper.clone(),
            jitter: Arc::new(NoJitter),
        },
    );

    let (report, _) = run_to_completion(&consumer, harness.cancel.clone()).await;

    assert_eq!(report.expect("clean stop").processed, 1);
    assert_eq!(sleeper.delays().len(), 2);
}

#[rstest]
#[case(1)]
#[case(3)]
#[tokio::test]
async fn unavailable_commits_back_off_and_keep_consuming(#[case] failures: u32) {
    let harness = Harness::new(
        vec![Ok(Delivery::Records(vec![
            post_record(0, 0, 50),
            post_record(0, 1, 51),
        ]))],
        &[],
    )
    .fail_next_commits(failures);
    let sleeper = Arc::new(RecordingSleeper::default());
    let consumer = harness.consumer(
        healthy_fanout(),
        NoOpFanoutMetrics,
        FanoutRuntime {
            sleeper: sleeper.clone(),
            jitter: Arc::new(NoJitter),
        },
    );

    let (report, _) = run_to_completion(&consumer, harness.cancel.clone()).await;

    assert_eq!(report.expect("commit failures are not fatal").processed, 2);
    assert_eq!(
        harness.commits(),
        vec![
            RecordPosition { partition: 0, offset: 0 },
            RecordPosition { partition: 0, offset: 1 },
        ]
    );
    assert_eq!(sleeper.delays().len(), usize::try_from(failures).expect("small count"));
    assert!(harness.closed());
}

/// Requests shutdown while a retry delay is being taken.
struct CancelOnSleep(CancellationToken);

#[async_trait]
impl RetrySleeper for CancelOnSleep {
    async fn sleep(&self, _duration: Duration) {
        self.0.cancel();
    }
}

#[rstest]
#[tokio::test]
async fn cancellation_during_commit_backoff_leaves_the_record_uncommitted() {
    let harness = Harness::new(
        vec![Ok(Delivery::Records(vec![
            post_record(0, 0, 50),
            post_record(0, 1, 51),
        ]))],
        &[],
    )
    .fail_next_commits(u32::MAX);
    let consumer = harness.consumer(
        healthy_fanout(),
        NoOpFanoutMetrics,
        FanoutRuntime {
            sleeper: Arc::new(CancelOnSleep(harness.cancel.clone())),
            jitter: Arc::new(NoJitter),
        },
    );

    let (report, _) = run_to_completion(&consumer, harness.cancel.clone()).await;

    assert_eq!(report.expect("clean stop").processed, 1);
    assert!(harness.commits().is_empty());
    assert!(harness.closed());
}

#[rstest]
#[tokio::test]
async fn subscribe_failure_stops_without_readiness() {
    let harness = Harness::new(Vec::new(), &[]);
    harness.source.0.lock().expect("source").take();
    let consumer = harness.consumer(healthy_fanout(), NoOpFanoutMetrics, immediate_runtime());

    let (report, ready) = run_to_completion(&consumer, CancellationToken::new()).await;

    assert_eq!(
        report.expect_err("subscribe fails").code(),
        ErrorCode::StorageFailure
    );
    assert!(!ready);
    assert_eq!(*consumer.state().borrow(), ConsumerState::Stopped);
}

/// Follow store whose follower query never completes.
struct StalledFollows;

#[async_trait]
impl FollowRepository for StalledFollows {
    async fn upsert(
        &self,
        _pair: FollowPair,
        _now: i64,
    ) -> Result<FollowEdge, FollowPersistenceError> {
        Err(FollowPersistenceError::query("unused"))
    }

    async fn soft_remove(&self, _pair: FollowPair) -> Result<bool, FollowPersistenceError> {
        Err(FollowPersistenceError::query("unused"))
    }

    async fn list_followings(
        &self,
        _follower: UserId,
        _request: &PageRequest,
    ) -> Result<Vec<FollowEdge>, FollowPersistenceError> {
        Err(FollowPersistenceError::query("unused"))
    }

    async fn list_followers(
        &self,
        _following: UserId,
        _request: &PageRequest,
    ) -> Result<Vec<FollowEdge>, FollowPersistenceError> {
        std::future::pending().await
    }
}

#[rstest]
#[tokio::test]
async fn cancellation_abandons_records_that_outlive_the_grace_period() {
    let harness = Harness::new(
        vec![Ok(Delivery::Records(vec![post_record(0, 0, 50)]))],
        &[],
    );
    let mut feed = MockFeedCache::new();
    feed.expect_set_post().returning(|_| Ok(()));
    let fanout = fanout_with(StalledFollows, feed, NewsfeedFanoutConfig::default());
    let consumer = harness.consumer(fanout, NoOpFanoutMetrics, immediate_runtime());

    let cancel = harness.cancel.clone();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });
    let (report, _) = run_to_completion(&consumer, cancel).await;

    assert_eq!(report.expect("clean stop"), ConsumerReport::default());
    assert!(harness.commits().is_empty());
    assert!(harness.closed());
}
