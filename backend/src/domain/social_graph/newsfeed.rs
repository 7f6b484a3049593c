//! Paginated newsfeed reads.

use std::collections::HashMap;

use pagination::{Page, PageRequest};
use tracing::warn;

use super::SocialGraphService;
use super::mapping::map_post_error;
use crate::domain::{Error, FeedEntry, Post, PostId, UserId};

impl SocialGraphService {
    /// Posts from accounts `user` follows, newest first.
    ///
    /// Reads the materialised feed first. When the feed is empty, missing,
    /// or unreadable, the page is rebuilt from the store by joining posts
    /// with active follow edges.
    pub async fn get_newsfeed(
        &self,
        user: UserId,
        request: &PageRequest,
    ) -> Result<Page<Post>, Error> {
        self.get_user_by_id_cached(user).await?;

        if let Some(page) = self.cached_newsfeed(user, request).await {
            return Ok(page);
        }

        let posts = self
            .posts
            .list_feed(user, request)
            .await
            .map_err(map_post_error)?;
        Ok(Page::from_ordered(posts, request))
    }

    async fn cached_newsfeed(&self, user: UserId, request: &PageRequest) -> Option<Page<Post>> {
        let cache = self.feed_cache.as_ref()?;
        let entries = match cache.list_feed_entries(user, request).await {
            Ok(entries) if !entries.is_empty() => entries,
            Ok(_) => return None,
            Err(error) => {
                warn!(user_id = %user, %error, "feed cache read failed");
                return None;
            }
        };

        match self.load_posts(&entries).await {
            Ok(posts) => Some(Page::from_ordered(posts, request)),
            Err(error) => {
                warn!(user_id = %user, %error, "could not hydrate cached feed");
                None
            }
        }
    }

    /// Resolve feed entries to posts in entry order, preferring cached
    /// snapshots.
    async fn load_posts(&self, entries: &[FeedEntry]) -> Result<Vec<Post>, Error> {
        let ids: Vec<PostId> = entries.iter().map(|entry| entry.post_id).collect();
        let mut found: HashMap<PostId, Post> = HashMap::with_capacity(ids.len());

        if let Some(cache) = &self.feed_cache {
            match cache.get_posts(&ids).await {
                Ok(snapshots) => {
                    for post in snapshots.into_iter().flatten() {
                        found.insert(post.id, post);
                    }
                }
                Err(error) => warn!(count = ids.len(), %error, "post cache batch read failed"),
            }
        }

        let missing: Vec<PostId> = ids
            .iter()
            .copied()
            .filter(|id| !found.contains_key(id))
            .collect();
        if !missing.is_empty() {
            let stored = self
                .posts
                .find_by_ids(&missing)
                .await
                .map_err(map_post_error)?;
            for post in stored {
                if let Some(cache) = &self.feed_cache {
                    if let Err(error) = cache.set_post(&post).await {
                        warn!(post_id = %post.id, %error, "failed to cache post snapshot");
                    }
                }
                found.insert(post.id, post);
            }
        }

        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }
}
