//! Follow, unfollow, and paginated follow lists.

use pagination::{Page, PageRequest};
use tracing::{debug, warn};

use super::SocialGraphService;
use super::mapping::map_follow_error;
use crate::domain::{Error, Follow, FollowListEntry, FollowMember, FollowPair, UserId};

impl SocialGraphService {
    /// Make `follower` follow `following`.
    ///
    /// Idempotent: following twice leaves one active edge and keeps its
    /// original timestamp; following after an unfollow reactivates the edge
    /// with a fresh timestamp.
    pub async fn follow(&self, follower: UserId, following: UserId) -> Result<Follow, Error> {
        let pair = FollowPair::new(follower, following)?;
        let follower_user = self.get_user_by_id_cached(follower).await?;
        let following_user = self.get_user_by_id_cached(following).await?;

        let edge = self
            .follows
            .upsert(pair, self.now())
            .await
            .map_err(map_follow_error)?;

        if let Some(cache) = &self.user_cache {
            if let Err(error) = cache
                .add_following(follower, following, edge.followed_at)
                .await
            {
                warn!(
                    follower_id = %follower,
                    following_id = %following,
                    %error,
                    "failed to mirror follow into cache"
                );
            }
        }

        debug!(follower_id = %follower, following_id = %following, "follow recorded");
        Ok(Follow {
            edge,
            follower: follower_user,
            following: following_user,
        })
    }

    /// Soft-remove the edge from `follower` to `following`.
    pub async fn unfollow(&self, follower: UserId, following: UserId) -> Result<(), Error> {
        let pair = FollowPair::new(follower, following)?;
        let existed = self
            .follows
            .soft_remove(pair)
            .await
            .map_err(map_follow_error)?;
        if !existed {
            return Err(Error::not_found(format!(
                "user {follower} does not follow user {following}"
            )));
        }

        if let Some(cache) = &self.user_cache {
            if let Err(error) = cache.remove_following(follower, following).await {
                warn!(
                    follower_id = %follower,
                    following_id = %following,
                    %error,
                    "failed to remove follow from cache"
                );
            }
        }
        Ok(())
    }

    /// Users `user` follows, newest follow first.
    ///
    /// A non-empty cached page is served directly. An empty, failed, or
    /// disabled cache falls back to the store, which applies the same
    /// ordering.
    pub async fn get_followings(
        &self,
        user: UserId,
        request: &PageRequest,
    ) -> Result<Page<FollowListEntry>, Error> {
        self.get_user_by_id_cached(user).await?;

        if let Some(page) = self.cached_followings(user, request).await {
            return Ok(page);
        }

        let edges = self
            .follows
            .list_followings(user, request)
            .await
            .map_err(map_follow_error)?;
        let members = edges.iter().map(|edge| edge.as_following()).collect();
        let entries = self.hydrate_members(members).await?;
        Ok(Page::from_ordered(entries, request))
    }

    /// Users following `user`, newest follow first. Served from the store.
    pub async fn get_followers(
        &self,
        user: UserId,
        request: &PageRequest,
    ) -> Result<Page<FollowListEntry>, Error> {
        self.get_user_by_id_cached(user).await?;

        let edges = self
            .follows
            .list_followers(user, request)
            .await
            .map_err(map_follow_error)?;
        let members = edges.iter().map(|edge| edge.as_follower()).collect();
        let entries = self.hydrate_members(members).await?;
        Ok(Page::from_ordered(entries, request))
    }

    async fn cached_followings(
        &self,
        user: UserId,
        request: &PageRequest,
    ) -> Option<Page<FollowListEntry>> {
        let cache = self.user_cache.as_ref()?;
        let members = match cache.list_followings(user, request).await {
            Ok(members) if !members.is_empty() => members,
            Ok(_) => return None,
            Err(error) => {
                warn!(user_id = %user, %error, "follow list cache read failed");
                return None;
            }
        };

        match self.hydrate_members(members).await {
            Ok(entries) => Some(Page::from_ordered(entries, request)),
            Err(error) => {
                warn!(user_id = %user, %error, "could not hydrate cached follow list");
                None
            }
        }
    }

    async fn hydrate_members(
        &self,
        members: Vec<FollowMember>,
    ) -> Result<Vec<FollowListEntry>, Error> {
        let ids: Vec<UserId> = members.iter().map(|member| member.user_id).collect();
        let users = self.load_users(&ids).await?;
        Ok(members
            .into_iter()
            .filter_map(|member| match users.get(&member.user_id) {
                Some(user) => Some(FollowListEntry {
                    user: user.clone(),
                    followed_at: member.followed_at,
                }),
                None => {
                    warn!(user_id = %member.user_id, "follow list references a missing user");
                    None
                }
            })
            .collect())
    }
}
