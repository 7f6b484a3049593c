//! Port for post persistence and the store-side feed rebuild query.
use async_trait::async_trait;
use pagination::PageRequest;

use crate::domain::{Post, PostContent, PostId, UserId};

use super::define_port_error;

define_port_error! {
    /// Persistence errors raised by post repository adapters.
    pub enum PostPersistenceError {
        /// Repository connection could not be established.
        Connection { message: String } => "post repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "post repository query failed: {message}",
    }
}

/// Durable store of posts.
///
/// Listings are ordered by `created_at` descending and then by post id
/// ascending, starting after the request cursor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Persist a post and return it with its assigned id.
    async fn create(
        &self,
        author: UserId,
        content: &PostContent,
        created_at: i64,
    ) -> Result<Post, PostPersistenceError>;

    /// Fetch every post in `ids` that exists, in no particular order.
    async fn find_by_ids(&self, ids: &[PostId]) -> Result<Vec<Post>, PostPersistenceError>;

    /// Posts written by `author`.
    async fn list_by_author(
        &self,
        author: UserId,
        request: &PageRequest,
    ) -> Result<Vec<Post>, PostPersistenceError>;

    /// Posts written by users that `recipient` actively follows.
    async fn list_feed(
        &self,
        recipient: UserId,
        request: &PageRequest,
    ) -> Result<Vec<Post>, PostPersistenceError>;
}
