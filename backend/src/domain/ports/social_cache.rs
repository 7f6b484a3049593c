//! Cache ports for user snapshots, follow lists, post snapshots, and feeds.
//!
//! The cache is never authoritative. Services treat every [`CacheError`] as
//! a miss and keep serving from the store.
use async_trait::async_trait;
use pagination::PageRequest;

use crate::domain::{FeedEntry, FollowMember, Post, PostId, User, UserId};

use super::define_port_error;

define_port_error! {
    /// Errors surfaced by caching adapters.
    pub enum CacheError {
        /// Cache backend is unavailable or timing out.
        Backend { message: String } => "cache backend failure: {message}",
        /// Serialisation or deserialisation of cached content failed.
        Serialization { message: String } => "cache serialisation failed: {message}",
    }
}

/// User snapshots and per-user follow lists.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserCache: Send + Sync {
    /// Store or refresh a user snapshot.
    async fn set_user(&self, user: &User) -> Result<(), CacheError>;

    /// Read one user snapshot.
    async fn get_user(&self, id: UserId) -> Result<Option<User>, CacheError>;

    /// Read several snapshots; the result is positionally aligned with `ids`.
    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<Option<User>>, CacheError>;

    /// Add `following` to `follower`'s follow list with score `followed_at`.
    async fn add_following(
        &self,
        follower: UserId,
        following: UserId,
        followed_at: i64,
    ) -> Result<(), CacheError>;

    /// Remove `following` from `follower`'s follow list.
    async fn remove_following(&self, follower: UserId, following: UserId)
    -> Result<(), CacheError>;

    /// One page of `follower`'s follow list in newest-first order.
    async fn list_followings(
        &self,
        follower: UserId,
        request: &PageRequest,
    ) -> Result<Vec<FollowMember>, CacheError>;
}

/// Post snapshots and per-user feeds.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedCache: Send + Sync {
    /// Store a post snapshot.
    async fn set_post(&self, post: &Post) -> Result<(), CacheError>;

    /// Read several post snapshots; the result is positionally aligned with
    /// `ids`.
    async fn get_posts(&self, ids: &[PostId]) -> Result<Vec<Option<Post>>, CacheError>;

    /// Add `entry` to every recipient's feed.
    ///
    /// Adding an entry that is already present leaves a single entry. When
    /// `max_entries` is set, each feed is trimmed to its newest
    /// `max_entries` items afterwards.
    async fn append_feed_entry(
        &self,
        recipients: &[UserId],
        entry: FeedEntry,
        max_entries: Option<usize>,
    ) -> Result<(), CacheError>;

    /// One page of `recipient`'s feed in newest-first order.
    async fn list_feed_entries(
        &self,
        recipient: UserId,
        request: &PageRequest,
    ) -> Result<Vec<FeedEntry>, CacheError>;
}
