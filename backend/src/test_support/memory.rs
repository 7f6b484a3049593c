//! In-memory store and cache doubles with failure injection.
//!
//! Both doubles honour the same ordering and idempotence contracts as the
//! PostgreSQL and Redis adapters, so service-level behaviour can be
//! exercised without external processes.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use pagination::{PageRequest, newest_first, paginate};

use crate::domain::ports::{
    CacheError, CredentialHashError, CredentialHasher, FeedCache, FollowPersistenceError,
    FollowRepository, PostPersistenceError, PostRepository, UserCache, UserPersistenceError,
    UserRepository,
};
use crate::domain::{
    FeedEntry, FollowEdge, FollowMember, FollowPair, HashedCredential, Password, Post, PostContent,
    PostId, User, UserAccount, UserId, UserProfile,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => panic!("in-memory double mutex poisoned"),
    }
}

#[derive(Default)]
struct StoreState {
    users: BTreeMap<UserId, UserAccount>,
    edges: BTreeMap<(UserId, UserId), FollowEdge>,
    posts: BTreeMap<PostId, Post>,
    next_user_id: i64,
    next_post_id: i64,
}

/// Relational store double implementing every repository port.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    failing: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a connection error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn is_failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }

    /// Stored edge for the pair, including removed edges.
    pub fn edge(&self, follower: UserId, following: UserId) -> Option<FollowEdge> {
        lock(&self.state).edges.get(&(follower, following)).copied()
    }

    /// Number of stored edges, active or removed.
    pub fn edge_count(&self) -> usize {
        lock(&self.state).edges.len()
    }

    /// Insert or replace an edge directly, bypassing upsert semantics.
    pub fn seed_edge(&self, edge: FollowEdge) {
        lock(&self.state)
            .edges
            .insert((edge.follower_id, edge.following_id), edge);
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn create(
        &self,
        profile: &UserProfile,
        credential: &HashedCredential,
    ) -> Result<User, UserPersistenceError> {
        if self.is_failing() {
            return Err(UserPersistenceError::connection("store offline"));
        }
        let mut state = lock(&self.state);
        if state
            .users
            .values()
            .any(|account| account.user.username() == &profile.username)
        {
            return Err(UserPersistenceError::duplicate_username(
                profile.username.as_ref(),
            ));
        }
        state.next_user_id += 1;
        let id = UserId::new(state.next_user_id)
            .map_err(|err| UserPersistenceError::query(err.to_string()))?;
        let user = User::new(id, profile.clone());
        state.users.insert(
            id,
            UserAccount {
                user: user.clone(),
                credential: credential.clone(),
            },
        );
        Ok(user)
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserAccount>, UserPersistenceError> {
        if self.is_failing() {
            return Err(UserPersistenceError::connection("store offline"));
        }
        Ok(lock(&self.state)
            .users
            .values()
            .find(|account| account.user.username().as_ref() == username)
            .cloned())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, UserPersistenceError> {
        if self.is_failing() {
            return Err(UserPersistenceError::connection("store offline"));
        }
        Ok(lock(&self.state)
            .users
            .get(&id)
            .map(|account| account.user.clone()))
    }

    async fn find_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, UserPersistenceError> {
        if self.is_failing() {
            return Err(UserPersistenceError::connection("store offline"));
        }
        let state = lock(&self.state);
        Ok(ids
            .iter()
            .filter_map(|id| state.users.get(id).map(|account| account.user.clone()))
            .collect())
    }
}

#[async_trait]
impl FollowRepository for InMemoryStore {
    async fn upsert(
        &self,
        pair: FollowPair,
        now: i64,
    ) -> Result<FollowEdge, FollowPersistenceError> {
        if self.is_failing() {
            return Err(FollowPersistenceError::connection("store offline"));
        }
        let mut state = lock(&self.state);
        let edge = state
            .edges
            .entry((pair.follower(), pair.following()))
            .or_insert(FollowEdge {
                follower_id: pair.follower(),
                following_id: pair.following(),
                followed_at: now,
                removed: false,
            });
        if edge.removed {
            edge.removed = false;
            edge.followed_at = now;
        }
        Ok(*edge)
    }

    async fn soft_remove(&self, pair: FollowPair) -> Result<bool, FollowPersistenceError> {
        if self.is_failing() {
            return Err(FollowPersistenceError::connection("store offline"));
        }
        let mut state = lock(&self.state);
        match state.edges.get_mut(&(pair.follower(), pair.following())) {
            Some(edge) => {
                edge.removed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_followings(
        &self,
        follower: UserId,
        request: &PageRequest,
    ) -> Result<Vec<FollowEdge>, FollowPersistenceError> {
        if self.is_failing() {
            return Err(FollowPersistenceError::connection("store offline"));
        }
        let state = lock(&self.state);
        let members = state
            .edges
            .values()
            .filter(|edge| edge.follower_id == follower && edge.is_active())
            .map(FollowEdge::as_following);
        Ok(paginate(members, request)
            .into_items()
            .into_iter()
            .filter_map(|member| state.edges.get(&(follower, member.user_id)).copied())
            .collect())
    }

    async fn list_followers(
        &self,
        following: UserId,
        request: &PageRequest,
    ) -> Result<Vec<FollowEdge>, FollowPersistenceError> {
        if self.is_failing() {
            return Err(FollowPersistenceError::connection("store offline"));
        }
        let state = lock(&self.state);
        let members = state
            .edges
            .values()
            .filter(|edge| edge.following_id == following && edge.is_active())
            .map(FollowEdge::as_follower);
        Ok(paginate(members, request)
            .into_items()
            .into_iter()
            .filter_map(|member| state.edges.get(&(member.user_id, following)).copied())
            .collect())
    }
}

#[async_trait]
impl PostRepository for InMemoryStore {
    async fn create(
        &self,
        author: UserId,
        content: &PostContent,
        created_at: i64,
    ) -> Result<Post, PostPersistenceError> {
        if self.is_failing() {
            return Err(PostPersistenceError::connection("store offline"));
        }
        let mut state = lock(&self.state);
        state.next_post_id += 1;
        let id = PostId::new(state.next_post_id)
            .map_err(|err| PostPersistenceError::query(err.to_string()))?;
        let post = Post {
            id,
            author_id: author,
            content: content.clone(),
            created_at,
        };
        state.posts.insert(id, post.clone());
        Ok(post)
    }

    async fn find_by_ids(&self, ids: &[PostId]) -> Result<Vec<Post>, PostPersistenceError> {
        if self.is_failing() {
            return Err(PostPersistenceError::connection("store offline"));
        }
        let state = lock(&self.state);
        Ok(ids
            .iter()
            .filter_map(|id| state.posts.get(id).cloned())
            .collect())
    }

    async fn list_by_author(
        &self,
        author: UserId,
        request: &PageRequest,
    ) -> Result<Vec<Post>, PostPersistenceError> {
        if self.is_failing() {
            return Err(PostPersistenceError::connection("store offline"));
        }
        let state = lock(&self.state);
        let posts = state
            .posts
            .values()
            .filter(|post| post.author_id == author)
            .cloned();
        Ok(paginate(posts, request).into_items())
    }

    async fn list_feed(
        &self,
        recipient: UserId,
        request: &PageRequest,
    ) -> Result<Vec<Post>, PostPersistenceError> {
        if self.is_failing() {
            return Err(PostPersistenceError::connection("store offline"));
        }
        let state = lock(&self.state);
        let posts = state
            .posts
            .values()
            .filter(|post| {
                state
                    .edges
                    .get(&(recipient, post.author_id))
                    .is_some_and(FollowEdge::is_active)
            })
            .cloned();
        Ok(paginate(posts, request).into_items())
    }
}

#[derive(Default)]
struct CacheState {
    users: HashMap<UserId, User>,
    followings: HashMap<UserId, HashMap<UserId, i64>>,
    posts: HashMap<PostId, Post>,
    feeds: HashMap<UserId, HashMap<PostId, i64>>,
}

/// Cache double implementing both cache ports.
#[derive(Default)]
pub struct InMemoryCache {
    state: Mutex<CacheState>,
    failing: AtomicBool,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a backend error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::backend("cache offline"));
        }
        Ok(())
    }

    /// Every entry in `recipient`'s feed, newest first.
    pub fn feed_entries(&self, recipient: UserId) -> Vec<FeedEntry> {
        let state = lock(&self.state);
        let mut entries: Vec<FeedEntry> = state
            .feeds
            .get(&recipient)
            .map(|feed| {
                feed.iter()
                    .map(|(post_id, created_at)| FeedEntry {
                        post_id: *post_id,
                        created_at: *created_at,
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(newest_first);
        entries
    }

    /// Drop every cached key, as after a cache restart.
    pub fn flush(&self) {
        *lock(&self.state) = CacheState::default();
    }

    pub fn cached_user(&self, id: UserId) -> Option<User> {
        lock(&self.state).users.get(&id).cloned()
    }
}

#[async_trait]
impl UserCache for InMemoryCache {
    async fn set_user(&self, user: &User) -> Result<(), CacheError> {
        self.check()?;
        lock(&self.state).users.insert(user.id(), user.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, CacheError> {
        self.check()?;
        Ok(lock(&self.state).users.get(&id).cloned())
    }

    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<Option<User>>, CacheError> {
        self.check()?;
        let state = lock(&self.state);
        Ok(ids.iter().map(|id| state.users.get(id).cloned()).collect())
    }

    async fn add_following(
        &self,
        follower: UserId,
        following: UserId,
        followed_at: i64,
    ) -> Result<(), CacheError> {
        self.check()?;
        lock(&self.state)
            .followings
            .entry(follower)
            .or_default()
            .insert(following, followed_at);
        Ok(())
    }

    async fn remove_following(
        &self,
        follower: UserId,
        following: UserId,
    ) -> Result<(), CacheError> {
        self.check()?;
        if let Some(list) = lock(&self.state).followings.get_mut(&follower) {
            list.remove(&following);
        }
        Ok(())
    }

    async fn list_followings(
        &self,
        follower: UserId,
        request: &PageRequest,
    ) -> Result<Vec<FollowMember>, CacheError> {
        self.check()?;
        let state = lock(&self.state);
        let members = state
            .followings
            .get(&follower)
            .into_iter()
            .flatten()
            .map(|(user_id, followed_at)| FollowMember {
                user_id: *user_id,
                followed_at: *followed_at,
            });
        Ok(paginate(members, request).into_items())
    }
}

#[async_trait]
impl FeedCache for InMemoryCache {
    async fn set_post(&self, post: &Post) -> Result<(), CacheError> {
        self.check()?;
        lock(&self.state).posts.insert(post.id, post.clone());
        Ok(())
    }

    async fn get_posts(&self, ids: &[PostId]) -> Result<Vec<Option<Post>>, CacheError> {
        self.check()?;
        let state = lock(&self.state);
        Ok(ids.iter().map(|id| state.posts.get(id).cloned()).collect())
    }

    async fn append_feed_entry(
        &self,
        recipients: &[UserId],
        entry: FeedEntry,
        max_entries: Option<usize>,
    ) -> Result<(), CacheError> {
        self.check()?;
        let mut state = lock(&self.state);
        for recipient in recipients {
            let feed = state.feeds.entry(*recipient).or_default();
            feed.insert(entry.post_id, entry.created_at);
            if let Some(max) = max_entries {
                if feed.len() > max {
                    let mut entries: Vec<FeedEntry> = feed
                        .iter()
                        .map(|(post_id, created_at)| FeedEntry {
                            post_id: *post_id,
                            created_at: *created_at,
                        })
                        .collect();
                    entries.sort_by(newest_first);
                    for stale in entries.iter().skip(max) {
                        feed.remove(&stale.post_id);
                    }
                }
            }
        }
        Ok(())
    }

    async fn list_feed_entries(
        &self,
        recipient: UserId,
        request: &PageRequest,
    ) -> Result<Vec<FeedEntry>, CacheError> {
        self.check()?;
        let state = lock(&self.state);
        let entries = state
            .feeds
            .get(&recipient)
            .into_iter()
            .flatten()
            .map(|(post_id, created_at)| FeedEntry {
                post_id: *post_id,
                created_at: *created_at,
            });
        Ok(paginate(entries, request).into_items())
    }
}

/// Reversible credential "hash" for fast tests. Never use outside tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextHasher;

const PLAINTEXT_PREFIX: &str = "plain$";

#[async_trait]
impl CredentialHasher for PlaintextHasher {
    async fn hash(&self, password: &Password) -> Result<HashedCredential, CredentialHashError> {
        Ok(HashedCredential::new(format!(
            "{PLAINTEXT_PREFIX}{}",
            password.expose()
        )))
    }

    async fn verify(
        &self,
        candidate: &str,
        stored: &HashedCredential,
    ) -> Result<bool, CredentialHashError> {
        match stored.as_str().strip_prefix(PLAINTEXT_PREFIX) {
            Some(expected) => Ok(expected == candidate),
            None => Err(CredentialHashError::malformed_hash("missing plaintext prefix")),
        }
    }
}
