//! PostgreSQL-backed partitioned post event log.
//!
//! Records live in `post_events`, keyed by `(partition_id, record_offset)`.
//! Offsets are allocated per partition through a row lock on
//! `post_event_partitions`, so records become visible in offset order.
//!
//! Consumer groups coordinate through three tables:
//! - `post_event_members`: live members, kept alive by heartbeats;
//! - `post_event_claims`: leased partition ownership, at most one member
//!   per partition;
//! - `post_event_offsets`: next undelivered offset per partition.
//!
//! Every member aims for a fair share of `ceil(partitions / members)`
//! claims. Members above their share release the excess, so a joining
//! member picks up partitions within one refresh interval. Commits only
//! succeed while the committing member still holds an unexpired claim.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{Array, BigInt, Binary, Double, Integer, Text};
use diesel_async::scoped_futures::ScopedFutureExt as _;
use diesel_async::{AsyncConnection as _, RunQueryDsl};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::ports::{
    Delivery, EventSourceError, PostCreatedEvent, PostEventPublisher, PostEventRecord,
    PostEventSource, PostEventSubscription, PublishError, RecordPosition,
};
use crate::outbound::persistence::models::PostEventRow;
use crate::outbound::persistence::schema::{post_event_claims, post_event_members, post_event_offsets};
use crate::outbound::persistence::{DbPool, PoolError};

use super::partitioner::Partitioner;

const APPEND_SQL: &str = "\
WITH allocated AS ( \
    INSERT INTO post_event_partitions (partition_id, next_offset) VALUES ($1, 1) \
    ON CONFLICT (partition_id) DO UPDATE \
    SET next_offset = post_event_partitions.next_offset + 1 \
    RETURNING next_offset - 1 AS record_offset \
) \
INSERT INTO post_events (partition_id, record_offset, record_key, payload) \
SELECT $1, record_offset, $2, $3 FROM allocated \
RETURNING record_offset";

const HEARTBEAT_SQL: &str = "\
INSERT INTO post_event_members (group_name, member_id, heartbeat_at) VALUES ($1, $2, NOW()) \
ON CONFLICT (group_name, member_id) DO UPDATE SET heartbeat_at = EXCLUDED.heartbeat_at";

const EXPIRE_MEMBERS_SQL: &str = "\
DELETE FROM post_event_members \
WHERE group_name = $1 AND heartbeat_at < NOW() - ($2 * INTERVAL '1 millisecond')";

const EXPIRE_CLAIMS_SQL: &str = "\
DELETE FROM post_event_claims c \
WHERE c.group_name = $1 AND (c.lease_expires_at < NOW() OR NOT EXISTS ( \
    SELECT 1 FROM post_event_members m \
    WHERE m.group_name = c.group_name AND m.member_id = c.member_id))";

const COUNT_MEMBERS_SQL: &str = "\
SELECT COUNT(*) AS members FROM post_event_members WHERE group_name = $1";

const RENEW_CLAIMS_SQL: &str = "\
UPDATE post_event_claims SET lease_expires_at = NOW() + ($3 * INTERVAL '1 millisecond') \
WHERE group_name = $1 AND member_id = $2 \
RETURNING partition_id";

const CLAIM_SQL: &str = "\
INSERT INTO post_event_claims (group_name, partition_id, member_id, lease_expires_at) \
SELECT $1, p, $2, NOW() + ($3 * INTERVAL '1 millisecond') \
FROM generate_series(0, $4 - 1) AS p \
WHERE NOT EXISTS ( \
    SELECT 1 FROM post_event_claims c WHERE c.group_name = $1 AND c.partition_id = p) \
ORDER BY p \
LIMIT $5 \
ON CONFLICT (group_name, partition_id) DO NOTHING \
RETURNING partition_id";

const FETCH_SQL: &str = "\
SELECT e.partition_id, e.record_offset, e.record_key, e.payload \
FROM post_events e \
JOIN UNNEST($1::int4[], $2::int8[]) AS pos(partition_id, next_offset) \
  ON e.partition_id = pos.partition_id AND e.record_offset >= pos.next_offset \
ORDER BY e.record_offset, e.partition_id \
LIMIT $3";

const COMMIT_SQL: &str = "\
INSERT INTO post_event_offsets (group_name, partition_id, next_offset) \
SELECT $1, $2, $3 \
WHERE EXISTS ( \
    SELECT 1 FROM post_event_claims \
    WHERE group_name = $1 AND partition_id = $2 AND member_id = $4 \
      AND lease_expires_at > NOW()) \
ON CONFLICT (group_name, partition_id) DO UPDATE \
SET next_offset = GREATEST(post_event_offsets.next_offset, EXCLUDED.next_offset)";

#[derive(QueryableByName)]
struct AppendedRow {
    #[diesel(sql_type = BigInt)]
    record_offset: i64,
}

#[derive(QueryableByName)]
struct MemberCountRow {
    #[diesel(sql_type = BigInt)]
    members: i64,
}

#[derive(QueryableByName)]
struct ClaimRow {
    #[diesel(sql_type = Integer)]
    partition_id: i32,
}

/// Partitioning, polling, and lease settings for [`PostgresPostLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresLogConfig {
    /// Number of partitions. Must not change while records exist.
    pub partitions: u32,
    /// How long an empty poll waits before reporting `Idle`.
    pub poll_interval: Duration,
    /// Lifetime of member heartbeats and partition claims.
    pub claim_lease: Duration,
    /// Upper bound on records returned by one poll.
    pub max_batch: usize,
}

impl Default for PostgresLogConfig {
    fn default() -> Self {
        Self {
            partitions: 16,
            poll_interval: Duration::from_millis(500),
            claim_lease: Duration::from_secs(30),
            max_batch: 100,
        }
    }
}

impl PostgresLogConfig {
    fn lease_millis(&self) -> f64 {
        self.claim_lease.as_secs_f64() * 1000.0
    }

    /// Claims are renewed three times per lease.
    fn refresh_interval(&self) -> Duration {
        self.claim_lease / 3
    }
}

/// Members' fair share of `partitions`, rounded up.
fn fair_share(partitions: u32, members: i64) -> usize {
    let members = u32::try_from(members.max(1)).unwrap_or(u32::MAX);
    usize::try_from(partitions.div_ceil(members)).unwrap_or(usize::MAX)
}

fn to_partition(raw: i32) -> u32 {
    u32::try_from(raw).unwrap_or(0)
}

fn to_offset(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}

fn map_source_pool_error(error: PoolError) -> EventSourceError {
    EventSourceError::unavailable(error.to_string())
}

fn map_source_diesel_error(error: diesel::result::Error) -> EventSourceError {
    debug!(error = %error, "post event log query failed");
    EventSourceError::unavailable(error.to_string())
}

/// Durable post event log over the shared PostgreSQL pool.
#[derive(Clone)]
pub struct PostgresPostLog {
    pool: DbPool,
    partitioner: Partitioner,
    config: PostgresLogConfig,
}

impl PostgresPostLog {
    /// Wrap a pool whose schema includes the post event tables.
    pub fn new(pool: DbPool, config: PostgresLogConfig) -> Self {
        Self {
            pool,
            partitioner: Partitioner::new(config.partitions),
            config,
        }
    }
}

#[async_trait]
impl PostEventPublisher for PostgresPostLog {
    async fn publish(&self, event: &PostCreatedEvent) -> Result<RecordPosition, PublishError> {
        let payload = event
            .to_payload()
            .map_err(|err| PublishError::serialization(err.to_string()))?;
        let key = event.partition_key();
        let partition = self.partitioner.partition_for(&key);

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| PublishError::unavailable(err.to_string()))?;
        let appended: AppendedRow = sql_query(APPEND_SQL)
            .bind::<Integer, _>(i32::try_from(partition).unwrap_or(i32::MAX))
            .bind::<Text, _>(&key)
            .bind::<Binary, _>(&payload)
            .get_result(&mut conn)
            .await
            .map_err(|err| {
                debug!(error = %err, "post event append failed");
                PublishError::unavailable(err.to_string())
            })?;

        Ok(RecordPosition {
            partition,
            offset: to_offset(appended.record_offset),
        })
    }
}

#[async_trait]
impl PostEventSource for PostgresPostLog {
    async fn subscribe(
        &self,
        group: &str,
        member: &str,
    ) -> Result<Box<dyn PostEventSubscription>, EventSourceError> {
        let mut subscription = PostgresSubscription {
            pool: self.pool.clone(),
            config: self.config.clone(),
            group: group.to_owned(),
            member: member.to_owned(),
            owned: BTreeSet::new(),
            positions: HashMap::new(),
            last_refresh: None,
            closed: false,
        };
        let claimed = subscription.refresh_claims().await?;
        subscription.adopt(claimed).await?;
        info!(
            group,
            member,
            partitions = ?subscription.owned,
            "joined post event consumer group"
        );
        Ok(Box::new(subscription))
    }
}

struct PostgresSubscription {
    pool: DbPool,
    config: PostgresLogConfig,
    group: String,
    member: String,
    owned: BTreeSet<u32>,
    /// Next offset to fetch for each owned partition.
    positions: HashMap<u32, u64>,
    last_refresh: Option<Instant>,
    closed: bool,
}

impl PostgresSubscription {
    fn refresh_due(&self) -> bool {
        self.last_refresh
            .is_none_or(|at| at.elapsed() >= self.config.refresh_interval())
    }

    /// Heartbeat, expire dead members, and converge on a fair share of
    /// partitions. Returns the partitions owned afterwards.
    async fn refresh_claims(&mut self) -> Result<BTreeSet<u32>, EventSourceError> {
        let mut conn = self.pool.get().await.map_err(map_source_pool_error)?;
        let group = self.group.as_str();
        let member = self.member.as_str();
        let lease = self.config.lease_millis();
        let partitions = self.config.partitions.max(1);

        let owned: Vec<i32> = conn
            .transaction(|conn| {
                async move {
                    sql_query(HEARTBEAT_SQL)
                        .bind::<Text, _>(group)
                        .bind::<Text, _>(member)
                        .execute(conn)
                        .await?;
                    sql_query(EXPIRE_MEMBERS_SQL)
                        .bind::<Text, _>(group)
                        .bind::<Double, _>(lease)
                        .execute(conn)
                        .await?;
                    sql_query(EXPIRE_CLAIMS_SQL)
                        .bind::<Text, _>(group)
                        .execute(conn)
                        .await?;

                    let live: MemberCountRow = sql_query(COUNT_MEMBERS_SQL)
                        .bind::<Text, _>(group)
                        .get_result(conn)
                        .await?;
                    let share = fair_share(partitions, live.members);

                    let renewed: Vec<ClaimRow> = sql_query(RENEW_CLAIMS_SQL)
                        .bind::<Text, _>(group)
                        .bind::<Text, _>(member)
                        .bind::<Double, _>(lease)
                        .load(conn)
                        .await?;
                    let mut owned: Vec<i32> =
                        renewed.into_iter().map(|row| row.partition_id).collect();
                    owned.sort_unstable();

                    if owned.len() > share {
                        let excess = owned.split_off(share);
                        diesel::delete(
                            post_event_claims::table
                                .filter(post_event_claims::group_name.eq(group))
                                .filter(post_event_claims::member_id.eq(member))
                                .filter(post_event_claims::partition_id.eq_any(&excess)),
                        )
                        .execute(conn)
                        .await?;
                    } else if owned.len() < share {
                        let wanted = i64::try_from(share - owned.len()).unwrap_or(i64::MAX);
                        let claimed: Vec<ClaimRow> = sql_query(CLAIM_SQL)
                            .bind::<Text, _>(group)
                            .bind::<Text, _>(member)
                            .bind::<Double, _>(lease)
                            .bind::<Integer, _>(i32::try_from(partitions).unwrap_or(i32::MAX))
                            .bind::<BigInt, _>(wanted)
                            .load(conn)
                            .await?;
                        owned.extend(claimed.into_iter().map(|row| row.partition_id));
                    }
                    Ok::<_, diesel::result::Error>(owned)
                }
                .scope_boxed()
            })
            .await
            .map_err(map_source_diesel_error)?;

        self.last_refresh = Some(Instant::now());
        Ok(owned.into_iter().map(to_partition).collect())
    }

    /// Switch to `owned`, starting newly owned partitions at their committed
    /// offsets. Returns whether the assignment changed.
    async fn adopt(&mut self, owned: BTreeSet<u32>) -> Result<bool, EventSourceError> {
        if owned == self.owned {
            return Ok(false);
        }
        let added: Vec<i32> = owned
            .difference(&self.owned)
            .map(|partition| i32::try_from(*partition).unwrap_or(i32::MAX))
            .collect();

        let committed: Vec<(i32, i64)> = if added.is_empty() {
            Vec::new()
        } else {
            let mut conn = self.pool.get().await.map_err(map_source_pool_error)?;
            post_event_offsets::table
                .filter(post_event_offsets::group_name.eq(&self.group))
                .filter(post_event_offsets::partition_id.eq_any(&added))
                .select((
                    post_event_offsets::partition_id,
                    post_event_offsets::next_offset,
                ))
                .load(&mut conn)
                .await
                .map_err(map_source_diesel_error)?
        };
        let committed: HashMap<u32, u64> = committed
            .into_iter()
            .map(|(partition, offset)| (to_partition(partition), to_offset(offset)))
            .collect();

        self.positions.retain(|partition, _| owned.contains(partition));
        for partition in &owned {
            self.positions
                .entry(*partition)
                .or_insert_with(|| committed.get(partition).copied().unwrap_or(0));
        }
        self.owned = owned;
        Ok(true)
    }

    async fn fetch(&mut self) -> Result<Vec<PostEventRecord>, EventSourceError> {
        let (partitions, offsets): (Vec<i32>, Vec<i64>) = self
            .positions
            .iter()
            .map(|(partition, offset)| {
                (
                    i32::try_from(*partition).unwrap_or(i32::MAX),
                    i64::try_from(*offset).unwrap_or(i64::MAX),
                )
            })
            .unzip();
        let mut conn = self.pool.get().await.map_err(map_source_pool_error)?;
        let rows: Vec<PostEventRow> = sql_query(FETCH_SQL)
            .bind::<Array<Integer>, _>(&partitions)
            .bind::<Array<BigInt>, _>(&offsets)
            .bind::<BigInt, _>(i64::try_from(self.config.max_batch.max(1)).unwrap_or(i64::MAX))
            .load(&mut conn)
            .await
            .map_err(map_source_diesel_error)?;

        let records: Vec<PostEventRecord> = rows
            .into_iter()
            .map(|row| PostEventRecord {
                position: RecordPosition {
                    partition: to_partition(row.partition_id),
                    offset: to_offset(row.record_offset),
                },
                key: row.record_key,
                payload: row.payload,
            })
            .collect();
        for record in &records {
            self.positions
                .insert(record.position.partition, record.position.offset + 1);
        }
        Ok(records)
    }

    async fn release(&mut self) -> Result<(), EventSourceError> {
        let mut conn = self.pool.get().await.map_err(map_source_pool_error)?;
        let group = self.group.as_str();
        let member = self.member.as_str();
        conn.transaction(|conn| {
            async move {
                diesel::delete(
                    post_event_claims::table
                        .filter(post_event_claims::group_name.eq(group))
                        .filter(post_event_claims::member_id.eq(member)),
                )
                .execute(conn)
                .await?;
                diesel::delete(
                    post_event_members::table
                        .filter(post_event_members::group_name.eq(group))
                        .filter(post_event_members::member_id.eq(member)),
                )
                .execute(conn)
                .await?;
                Ok::<_, diesel::result::Error>(())
            }
            .scope_boxed()
        })
        .await
        .map_err(map_source_diesel_error)
    }
}

#[async_trait]
impl PostEventSubscription for PostgresSubscription {
    async fn poll(&mut self) -> Result<Delivery, EventSourceError> {
        if self.closed {
            return Err(EventSourceError::closed());
        }
        if self.refresh_due() {
            let owned = self.refresh_claims().await?;
            if self.adopt(owned).await? {
                return Ok(Delivery::Rebalanced {
                    assigned: self.owned.iter().copied().collect(),
                });
            }
        }

        if !self.positions.is_empty() {
            let records = self.fetch().await?;
            if !records.is_empty() {
                return Ok(Delivery::Records(records));
            }
        }
        tokio::time::sleep(self.config.poll_interval).await;
        Ok(Delivery::Idle)
    }

    async fn commit(&mut self, position: RecordPosition) -> Result<(), EventSourceError> {
        if self.closed {
            return Err(EventSourceError::closed());
        }
        let mut conn = self.pool.get().await.map_err(map_source_pool_error)?;
        let updated = sql_query(COMMIT_SQL)
            .bind::<Text, _>(&self.group)
            .bind::<Integer, _>(i32::try_from(position.partition).unwrap_or(i32::MAX))
            .bind::<BigInt, _>(i64::try_from(position.offset + 1).unwrap_or(i64::MAX))
            .bind::<Text, _>(&self.member)
            .execute(&mut conn)
            .await
            .map_err(map_source_diesel_error)?;

        if updated == 0 {
            warn!(
                group = %self.group,
                member = %self.member,
                partition = position.partition,
                "commit rejected; partition claim lost"
            );
            self.owned.remove(&position.partition);
            self.positions.remove(&position.partition);
            self.last_refresh = None;
            return Err(EventSourceError::lost_claim(position.partition));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EventSourceError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.release().await?;
        info!(group = %self.group, member = %self.member, "left post event consumer group");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(16, 1, 16)]
    #[case(16, 3, 6)]
    #[case(16, 16, 1)]
    #[case(4, 6, 1)]
    #[case(4, 0, 4)]
    fn fair_share_rounds_up(#[case] partitions: u32, #[case] members: i64, #[case] expected: usize) {
        assert_eq!(fair_share(partitions, members), expected);
    }

    #[rstest]
    fn claims_refresh_three_times_per_lease() {
        let config = PostgresLogConfig {
            claim_lease: Duration::from_secs(30),
            ..PostgresLogConfig::default()
        };
        assert_eq!(config.refresh_interval(), Duration::from_secs(10));
        assert!((config.lease_millis() - 30_000.0).abs() < f64::EPSILON);
    }

    #[rstest]
    fn negative_database_values_clamp_to_zero() {
        assert_eq!(to_partition(-1), 0);
        assert_eq!(to_offset(-5), 0);
        assert_eq!(to_offset(7), 7);
    }
}
