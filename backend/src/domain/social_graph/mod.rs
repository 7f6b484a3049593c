//! Social graph service: accounts, follows, follow lists, and feed reads.
//!
//! The service applies a cache-aside protocol. The store is the source of
//! truth; the cache is consulted first on reads and updated best-effort
//! after writes. Cache failures are logged and treated as misses.

use std::collections::HashMap;
use std::sync::Arc;

use mockable::Clock;
use tracing::warn;

use crate::domain::ports::{
    CredentialHasher, FeedCache, FollowRepository, PostRepository, UserCache, UserRepository,
};
use crate::domain::{Error, User, UserId};

mod accounts;
mod follows;
pub(super) mod mapping;
mod newsfeed;

/// Store-side collaborators required by the service.
pub struct SocialGraphPorts {
    /// User account persistence.
    pub users: Arc<dyn UserRepository>,
    /// Follow edge persistence.
    pub follows: Arc<dyn FollowRepository>,
    /// Post persistence, used for feed fallback reads.
    pub posts: Arc<dyn PostRepository>,
    /// Password hashing primitive.
    pub hasher: Arc<dyn CredentialHasher>,
}

/// Optional cache collaborators. `None` disables the corresponding cache.
#[derive(Clone, Default)]
pub struct SocialGraphCaches {
    /// User snapshots and follow lists.
    pub users: Option<Arc<dyn UserCache>>,
    /// Post snapshots and materialised feeds.
    pub feed: Option<Arc<dyn FeedCache>>,
}

/// Domain service for the social graph read/write path.
#[derive(Clone)]
pub struct SocialGraphService {
    users: Arc<dyn UserRepository>,
    follows: Arc<dyn FollowRepository>,
    posts: Arc<dyn PostRepository>,
    hasher: Arc<dyn CredentialHasher>,
    user_cache: Option<Arc<dyn UserCache>>,
    feed_cache: Option<Arc<dyn FeedCache>>,
    clock: Arc<dyn Clock>,
}

impl SocialGraphService {
    /// Build the service from its ports, optional caches, and a clock.
    pub fn new(ports: SocialGraphPorts, caches: SocialGraphCaches, clock: Arc<dyn Clock>) -> Self {
        Self {
            users: ports.users,
            follows: ports.follows,
            posts: ports.posts,
            hasher: ports.hasher,
            user_cache: caches.users,
            feed_cache: caches.feed,
            clock,
        }
    }

    fn now(&self) -> i64 {
        self.clock.utc().timestamp()
    }

    /// Read-through user lookup: cache first, then the store, repopulating
    /// the cache on a store hit.
    pub async fn get_user_by_id_cached(&self, id: UserId) -> Result<User, Error> {
        if let Some(cache) = &self.user_cache {
            match cache.get_user(id).await {
                Ok(Some(user)) => return Ok(user),
                Ok(None) => {}
                Err(error) => {
                    warn!(user_id = %id, %error, "user cache read failed; reading from store");
                }
            }
        }

        let user = self
            .users
            .find_by_id(id)
            .await
            .map_err(mapping::map_user_error)?
            .ok_or_else(|| Error::not_found(format!("user {id} not found")))?;
        self.cache_user(&user).await;
        Ok(user)
    }

    async fn cache_user(&self, user: &User) {
        let Some(cache) = &self.user_cache else {
            return;
        };
        if let Err(error) = cache.set_user(user).await {
            warn!(user_id = %user.id(), %error, "failed to cache user snapshot");
        }
    }

    /// Resolve many users, preferring cached snapshots and reading the rest
    /// from the store.
    async fn load_users(&self, ids: &[UserId]) -> Result<HashMap<UserId, User>, Error> {
        let mut found = HashMap::with_capacity(ids.len());
        if ids.is_empty() {
            return Ok(found);
        }

        if let Some(cache) = &self.user_cache {
            match cache.get_users(ids).await {
                Ok(snapshots) => {
                    for user in snapshots.into_iter().flatten() {
                        found.insert(user.id(), user);
                    }
                }
                Err(error) => {
                    warn!(count = ids.len(), %error, "user cache batch read failed");
                }
            }
        }

        let missing: Vec<UserId> = ids
            .iter()
            .copied()
            .filter(|id| !found.contains_key(id))
            .collect();
        if missing.is_empty() {
            return Ok(found);
        }

        let stored = self
            .users
            .find_by_ids(&missing)
            .await
            .map_err(mapping::map_user_error)?;
        for user in stored {
            self.cache_user(&user).await;
            found.insert(user.id(), user);
        }
        Ok(found)
    }
}
