//! PostgreSQL-backed `FollowRepository` implementation using Diesel ORM.
//!
//! Edges are never deleted. Unfollowing sets `removed`, and following again
//! reactivates the same row with a fresh `followed_at`. Both list directions
//! are served by partial indexes over active edges.

use async_trait::async_trait;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel_async::RunQueryDsl;
use pagination::PageRequest;

use crate::domain::ports::{FollowPersistenceError, FollowRepository};
use crate::domain::{FollowEdge, FollowPair, UserId};

use super::diesel_basic_error_mapping::{map_basic_diesel_error, map_basic_pool_error, sql_limit};
use super::models::FollowEdgeRow;
use super::pool::{DbPool, PoolError};
use super::schema::user_follows;

/// Insert the edge, or reactivate it when it was removed. An already active
/// edge is left untouched and no row is returned.
const UPSERT_EDGE_SQL: &str = "\
INSERT INTO user_follows (follower_id, following_id, followed_at, removed) \
VALUES ($1, $2, $3, FALSE) \
ON CONFLICT (follower_id, following_id) DO UPDATE \
SET followed_at = EXCLUDED.followed_at, removed = FALSE \
WHERE user_follows.removed \
RETURNING follower_id, following_id, followed_at, removed";

/// Diesel-backed implementation of the `FollowRepository` port.
#[derive(Clone)]
pub struct DieselFollowRepository {
    pool: DbPool,
}

impl DieselFollowRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> FollowPersistenceError {
    map_basic_pool_error(error, FollowPersistenceError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> FollowPersistenceError {
    map_basic_diesel_error(
        error,
        FollowPersistenceError::query,
        FollowPersistenceError::connection,
    )
}

fn row_to_edge(row: FollowEdgeRow) -> Result<FollowEdge, FollowPersistenceError> {
    let invalid = |err| {
        FollowPersistenceError::query(format!(
            "stored follow edge {}->{} is invalid: {err}",
            row.follower_id, row.following_id
        ))
    };
    Ok(FollowEdge {
        follower_id: UserId::new(row.follower_id).map_err(invalid)?,
        following_id: UserId::new(row.following_id).map_err(invalid)?,
        followed_at: row.followed_at,
        removed: row.removed,
    })
}

/// Which side of the edge a listing is anchored on.
#[derive(Debug, Clone, Copy)]
enum Direction {
    /// Edges whose follower is the anchor, keyed by `following_id`.
    Followings(UserId),
    /// Edges whose followed user is the anchor, keyed by `follower_id`.
    Followers(UserId),
}

/// Active edges for one direction, after the cursor, in newest-first order.
fn active_edges(direction: Direction, request: &PageRequest) -> user_follows::BoxedQuery<'static, Pg> {
    let base = user_follows::table
        .filter(user_follows::removed.eq(false))
        .into_boxed();
    let cursor = request.cursor();
    let limit = sql_limit(request.limit());

    match direction {
        Direction::Followings(follower) => {
            let mut query = base.filter(user_follows::follower_id.eq(follower.get()));
            if let Some(cursor) = cursor {
                query = match cursor.tie_key() {
                    Some(key) => query.filter(
                        user_follows::followed_at.lt(cursor.score()).or(user_follows::followed_at
                            .eq(cursor.score())
                            .and(user_follows::following_id.gt(key))),
                    ),
                    None => query.filter(user_follows::followed_at.lt(cursor.score())),
                };
            }
            query
                .order((
                    user_follows::followed_at.desc(),
                    user_follows::following_id.asc(),
                ))
                .limit(limit)
        }
        Direction::Followers(following) => {
            let mut query = base.filter(user_follows::following_id.eq(following.get()));
            if let Some(cursor) = cursor {
                query = match cursor.tie_key() {
                    Some(key) => query.filter(
                        user_follows::followed_at.lt(cursor.score()).or(user_follows::followed_at
                            .eq(cursor.score())
                            .and(user_follows::follower_id.gt(key))),
                    ),
                    None => query.filter(user_follows::followed_at.lt(cursor.score())),
                };
            }
            query
                .order((
                    user_follows::followed_at.desc(),
                    user_follows::follower_id.asc(),
                ))
                .limit(limit)
        }
    }
}

impl DieselFollowRepository {
    async fn list(
        &self,
        direction: Direction,
        request: &PageRequest,
    ) -> Result<Vec<FollowEdge>, FollowPersistenceError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<FollowEdgeRow> = active_edges(direction, request)
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        rows.into_iter().map(row_to_edge).collect()
    }
}

#[async_trait]
impl FollowRepository for DieselFollowRepository {
    async fn upsert(
        &self,
        pair: FollowPair,
        now: i64,
    ) -> Result<FollowEdge, FollowPersistenceError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let changed: Option<FollowEdgeRow> = diesel::sql_query(UPSERT_EDGE_SQL)
            .bind::<BigInt, _>(pair.follower().get())
            .bind::<BigInt, _>(pair.following().get())
            .bind::<BigInt, _>(now)
            .get_result(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        let row = match changed {
            Some(row) => row,
            None => user_follows::table
                .filter(user_follows::follower_id.eq(pair.follower().get()))
                .filter(user_follows::following_id.eq(pair.following().get()))
                .select(FollowEdgeRow::as_select())
                .first(&mut conn)
                .await
                .map_err(map_diesel_error)?,
        };
        row_to_edge(row)
    }

    async fn soft_remove(&self, pair: FollowPair) -> Result<bool, FollowPersistenceError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let updated = diesel::update(
            user_follows::table
                .filter(user_follows::follower_id.eq(pair.follower().get()))
                .filter(user_follows::following_id.eq(pair.following().get())),
        )
        .set(user_follows::removed.eq(true))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;

        Ok(updated > 0)
    }

    async fn list_followings(
        &self,
        follower: UserId,
        request: &PageRequest,
    ) -> Result<Vec<FollowEdge>, FollowPersistenceError> {
        self.list(Direction::Followings(follower), request).await
    }

    async fn list_followers(
        &self,
        following: UserId,
        request: &PageRequest,
    ) -> Result<Vec<FollowEdge>, FollowPersistenceError> {
        self.list(Direction::Followers(following), request).await
    }
}
