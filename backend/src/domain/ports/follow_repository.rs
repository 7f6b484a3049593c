//! Port for durable follow edges and both directions of the follow index.
use async_trait::async_trait;
use pagination::PageRequest;

use crate::domain::{FollowEdge, FollowPair, UserId};

use super::define_port_error;

define_port_error! {
    /// Persistence errors raised by follow repository adapters.
    pub enum FollowPersistenceError {
        /// Repository connection could not be established.
        Connection { message: String } => "follow repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "follow repository query failed: {message}",
    }
}

/// Durable follow graph.
///
/// Listings return active edges only, ordered by `followed_at` descending
/// and then by the id of the other participant ascending, starting after the
/// request cursor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FollowRepository: Send + Sync {
    /// Atomically create the edge, reactivate a removed edge with `now`, or
    /// return the already active edge unchanged.
    async fn upsert(&self, pair: FollowPair, now: i64)
    -> Result<FollowEdge, FollowPersistenceError>;

    /// Mark the edge removed. Returns `false` when no edge exists for the
    /// pair.
    async fn soft_remove(&self, pair: FollowPair) -> Result<bool, FollowPersistenceError>;

    /// Users followed by `follower`.
    async fn list_followings(
        &self,
        follower: UserId,
        request: &PageRequest,
    ) -> Result<Vec<FollowEdge>, FollowPersistenceError>;

    /// Users following `following`.
    async fn list_followers(
        &self,
        following: UserId,
        request: &PageRequest,
    ) -> Result<Vec<FollowEdge>, FollowPersistenceError>;
}
