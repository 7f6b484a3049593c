//! Redis-backed `UserCache` and `FeedCache` adapter.
//!
//! Snapshots are JSON strings written with a jittered TTL. Follow lists and
//! feeds are sorted sets scored by epoch seconds, with member ids stored as
//! decimal strings.

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::bb8::{self, PooledConnection};
use bb8_redis::redis::{self, AsyncCommands};
use bb8_redis::RedisConnectionManager;
use pagination::{Keyed, PageRequest, paginate};
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::domain::ports::{CacheError, FeedCache, UserCache};
use crate::domain::{FeedEntry, FollowMember, Post, PostId, User, UserId};

use super::keys::{feed_key, followings_key, post_key, user_key};

/// Connection and expiry settings for [`RedisSocialCache`].
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    url: String,
    snapshot_ttl: Duration,
    max_connections: u32,
    connection_timeout: Duration,
}

impl RedisCacheConfig {
    /// Defaults: one hour snapshot TTL, 16 connections, 2 second checkout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            snapshot_ttl: Duration::from_secs(3600),
            max_connections: 16,
            connection_timeout: Duration::from_secs(2),
        }
    }

    /// Base lifetime of user and post snapshots.
    pub fn with_snapshot_ttl(mut self, ttl: Duration) -> Self {
        self.snapshot_ttl = ttl;
        self
    }

    /// Pool size, never below one.
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// How long a checkout may wait for a free connection.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }
}

/// Redis cache for user snapshots, follow lists, post snapshots, and feeds.
#[derive(Clone)]
pub struct RedisSocialCache {
    pool: bb8::Pool<RedisConnectionManager>,
    snapshot_ttl: Duration,
}

impl RedisSocialCache {
    /// Build the connection pool. Connections are opened lazily, so an
    /// unreachable server surfaces on first use rather than here.
    pub async fn connect(config: RedisCacheConfig) -> Result<Self, CacheError> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .map_err(|err| CacheError::backend(format!("invalid redis url: {err}")))?;
        let pool = bb8::Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|err| CacheError::backend(err.to_string()))?;
        Ok(Self {
            pool,
            snapshot_ttl: config.snapshot_ttl,
        })
    }

    async fn connection(
        &self,
    ) -> Result<PooledConnection<'_, RedisConnectionManager>, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|err| CacheError::backend(format!("redis checkout failed: {err}")))
    }

    /// TTL in seconds with up to ten percent added, so snapshots written
    /// together do not expire together.
    fn jittered_ttl_secs(&self) -> u64 {
        let base = self.snapshot_ttl.as_secs().max(1);
        let spread = base / 10;
        base + rand::thread_rng().gen_range(0..=spread)
    }

    async fn set_snapshot<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let payload = encode(value)?;
        let ttl = self.jittered_ttl_secs();
        let mut conn = self.connection().await?;
        let (): () = conn
            .set_ex(key, payload, ttl)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn get_snapshots<T: DeserializeOwned>(
        &self,
        keys: Vec<String>,
    ) -> Result<Vec<Option<T>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut *conn)
            .await
            .map_err(map_redis_error)?;
        raw.into_iter()
            .map(|value| value.as_deref().map(decode).transpose())
            .collect()
    }

    /// One page of a sorted set in newest-first order, ties by ascending
    /// numeric member.
    async fn sorted_page(
        &self,
        key: &str,
        request: &PageRequest,
    ) -> Result<Vec<(i64, i64)>, CacheError> {
        let mut conn = self.connection().await?;
        let mut cursor_group = Vec::new();

        let upper = match request.cursor() {
            None => "+inf".to_owned(),
            Some(cursor) => {
                if cursor.tie_key().is_some() {
                    cursor_group = score_group(&mut conn, key, cursor.score()).await?;
                }
                format!("({}", cursor.score())
            }
        };

        let head: Vec<(String, f64)> = redis::cmd("ZREVRANGEBYSCORE")
            .arg(key)
            .arg(&upper)
            .arg("-inf")
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(0)
            .arg(request.limit())
            .query_async(&mut *conn)
            .await
            .map_err(map_redis_error)?;
        let head = parse_members(head)?;

        let mut boundary_group = Vec::new();
        if head.len() == request.limit() {
            if let Some(&(boundary, _)) = head.last() {
                boundary_group = score_group(&mut conn, key, boundary).await?;
            }
        }
        Ok(merge_page(cursor_group, head, boundary_group, request))
    }
}

/// Combine sorted-set reads into one page.
///
/// Redis breaks score ties lexicographically (`"10"` before `"9"`), so the
/// head alone may cut a score group in the wrong place. `cursor_group` holds
/// every member sharing the cursor's score and `boundary_group` every member
/// sharing the last head score; the page is then re-derived with numeric
/// tie-breaks.
fn merge_page(
    cursor_group: Vec<(i64, i64)>,
    head: Vec<(i64, i64)>,
    boundary_group: Vec<(i64, i64)>,
    request: &PageRequest,
) -> Vec<(i64, i64)> {
    let mut candidates = cursor_group;
    candidates.extend(head);
    candidates.extend(boundary_group);
    candidates.sort_unstable();
    candidates.dedup();

    let members = candidates
        .into_iter()
        .map(|(score, member)| Scored { score, member });
    paginate(members, request)
        .into_items()
        .into_iter()
        .map(|item| (item.score, item.member))
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    score: i64,
    member: i64,
}

impl Keyed for Scored {
    fn score(&self) -> i64 {
        self.score
    }

    fn tie_key(&self) -> i64 {
        self.member
    }
}

async fn score_group(
    conn: &mut PooledConnection<'_, RedisConnectionManager>,
    key: &str,
    score: i64,
) -> Result<Vec<(i64, i64)>, CacheError> {
    let group: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
        .arg(key)
        .arg(score)
        .arg(score)
        .arg("WITHSCORES")
        .query_async(&mut **conn)
        .await
        .map_err(map_redis_error)?;
    parse_members(group)
}

fn parse_members(raw: Vec<(String, f64)>) -> Result<Vec<(i64, i64)>, CacheError> {
    raw.into_iter()
        .map(|(member, score)| {
            let member = member.parse::<i64>().map_err(|err| {
                CacheError::serialization(format!("sorted set member {member:?}: {err}"))
            })?;
            Ok((score as i64, member))
        })
        .collect()
}

fn encode<T: Serialize>(value: &T) -> Result<String, CacheError> {
    serde_json::to_string(value).map_err(|err| CacheError::serialization(err.to_string()))
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, CacheError> {
    serde_json::from_str(raw).map_err(|err| CacheError::serialization(err.to_string()))
}

fn map_redis_error(error: redis::RedisError) -> CacheError {
    debug!(kind = ?error.kind(), "redis command failed");
    CacheError::backend(error.to_string())
}

fn invalid_member(kind: &str, raw: i64) -> CacheError {
    CacheError::serialization(format!("{kind} member {raw} is not a valid id"))
}

#[async_trait]
impl UserCache for RedisSocialCache {
    async fn set_user(&self, user: &User) -> Result<(), CacheError> {
        self.set_snapshot(&user_key(user.id()), user).await
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, CacheError> {
        let mut found = self.get_snapshots::<User>(vec![user_key(id)]).await?;
        Ok(found.pop().flatten())
    }

    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<Option<User>>, CacheError> {
        self.get_snapshots(ids.iter().copied().map(user_key).collect())
            .await
    }

    async fn add_following(
        &self,
        follower: UserId,
        following: UserId,
        followed_at: i64,
    ) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let (): () = conn
            .zadd(followings_key(follower), following.get(), followed_at)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn remove_following(
        &self,
        follower: UserId,
        following: UserId,
    ) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let (): () = conn
            .zrem(followings_key(follower), following.get())
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn list_followings(
        &self,
        follower: UserId,
        request: &PageRequest,
    ) -> Result<Vec<FollowMember>, CacheError> {
        self.sorted_page(&followings_key(follower), request)
            .await?
            .into_iter()
            .map(|(followed_at, member)| {
                let user_id =
                    UserId::new(member).map_err(|_| invalid_member("followings", member))?;
                Ok(FollowMember {
                    user_id,
                    followed_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl FeedCache for RedisSocialCache {
    async fn set_post(&self, post: &Post) -> Result<(), CacheError> {
        self.set_snapshot(&post_key(post.id), post).await
    }

    async fn get_posts(&self, ids: &[PostId]) -> Result<Vec<Option<Post>>, CacheError> {
        self.get_snapshots(ids.iter().copied().map(post_key).collect())
            .await
    }

    async fn append_feed_entry(
        &self,
        recipients: &[UserId],
        entry: FeedEntry,
        max_entries: Option<usize>,
    ) -> Result<(), CacheError> {
        if recipients.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for recipient in recipients {
            let key = feed_key(*recipient);
            pipe.zadd(&key, entry.post_id.get(), entry.created_at).ignore();
            if let Some(max) = max_entries {
                // Ranks ascend by score; drop everything below the newest `max`.
                let stop = isize::try_from(max).map_or(isize::MIN, |keep| -keep - 1);
                pipe.zremrangebyrank(&key, 0, stop).ignore();
            }
        }

        let mut conn = self.connection().await?;
        let (): () = pipe
            .query_async(&mut *conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn list_feed_entries(
        &self,
        recipient: UserId,
        request: &PageRequest,
    ) -> Result<Vec<FeedEntry>, CacheError> {
        self.sorted_page(&feed_key(recipient), request)
            .await?
            .into_iter()
            .map(|(created_at, member)| {
                let post_id = PostId::new(member).map_err(|_| invalid_member("feed", member))?;
                Ok(FeedEntry {
                    post_id,
                    created_at,
                })
            })
            .collect()
    }
}
