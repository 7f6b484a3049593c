//! Fan-out-on-write delivery of new posts into follower feeds.
//!
//! [`NewsfeedFanout`] materialises one `PostCreated` event into every
//! follower's feed. [`FanoutConsumer`] drives it from a partitioned event
//! log with bounded retries and cooperative shutdown.

use std::sync::Arc;

use pagination::{MAX_LIMIT, Page, PageRequest};
use tracing::debug;

use crate::domain::ports::{CacheError, FeedCache, FollowRepository, PostCreatedEvent};
use crate::domain::social_graph::mapping::map_follow_error;
use crate::domain::{Error, FeedEntry, FollowMember, UserId};

mod consumer;
mod runtime;

pub use consumer::{ConsumerReport, ConsumerState, FanoutConsumer, FanoutConsumerConfig};
pub use runtime::{AttemptJitter, BackoffJitter, FanoutRuntime, RetrySleeper, TokioSleeper};

/// Batching and retention for feed materialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewsfeedFanoutConfig {
    /// Followers resolved per store page, clamped to `1..=100`.
    pub batch_size: usize,
    /// Newest entries kept per feed; `None` keeps everything.
    pub max_feed_entries: Option<usize>,
}

impl Default for NewsfeedFanoutConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_LIMIT,
            max_feed_entries: Some(800),
        }
    }
}

/// Summary of one successful fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanoutOutcome {
    /// Feeds the post was appended to.
    pub recipients: usize,
    /// Follower pages read from the store.
    pub batches: usize,
}

/// Appends posts to follower feeds.
pub struct NewsfeedFanout {
    follows: Arc<dyn FollowRepository>,
    feed: Arc<dyn FeedCache>,
    config: NewsfeedFanoutConfig,
}

fn map_feed_error(error: CacheError) -> Error {
    Error::storage(format!("feed cache write failed: {error}"))
}

impl NewsfeedFanout {
    /// Build a fan-out over the follow store and feed cache.
    pub fn new(
        follows: Arc<dyn FollowRepository>,
        feed: Arc<dyn FeedCache>,
        config: NewsfeedFanoutConfig,
    ) -> Self {
        Self {
            follows,
            feed,
            config,
        }
    }

    /// Deliver `event` to the author's current followers.
    ///
    /// Safe to repeat: feed entries are keyed by post id, so a redelivered
    /// event leaves one entry per recipient.
    pub async fn fan_out(&self, event: &PostCreatedEvent) -> Result<FanoutOutcome, Error> {
        let post = &event.post;
        let entry = FeedEntry::from(post);
        self.feed.set_post(post).await.map_err(map_feed_error)?;

        let batch_size = self.config.batch_size.clamp(1, MAX_LIMIT);
        let mut request = PageRequest::first_page(batch_size)?;
        let mut outcome = FanoutOutcome::default();
        loop {
            let edges = self
                .follows
                .list_followers(event.author_id(), &request)
                .await
                .map_err(map_follow_error)?;
            outcome.batches += 1;
            if edges.is_empty() {
                break;
            }

            let recipients: Vec<UserId> = edges.iter().map(|edge| edge.follower_id).collect();
            self.feed
                .append_feed_entry(&recipients, entry, self.config.max_feed_entries)
                .await
                .map_err(map_feed_error)?;
            outcome.recipients += recipients.len();

            let members: Vec<FollowMember> = edges.iter().map(|edge| edge.as_follower()).collect();
            match Page::from_ordered(members, &request).next_cursor() {
                Some(cursor) => request = PageRequest::new(Some(cursor), batch_size)?,
                None => break,
            }
        }

        debug!(
            post_id = %post.id,
            author_id = %post.author_id,
            recipients = outcome.recipients,
            batches = outcome.batches,
            "post fanned out"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests;
