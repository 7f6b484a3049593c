//! Behavioural tests for the social graph and post services over the
//! in-memory store and cache doubles.

use std::sync::Arc;
use std::time::Duration;

use newsfeed::domain::ports::{FeedCache, UserCache};
use newsfeed::domain::{
    ErrorCode, PostContent, PostService, SignUpRequest, SocialGraphCaches, SocialGraphPorts,
    SocialGraphService, User, UserId,
};
use newsfeed::outbound::queue::InMemoryPostLog;
use newsfeed::test_support::clock::MutableClock;
use newsfeed::test_support::memory::{InMemoryCache, InMemoryStore, PlaintextHasher};
use pagination::PageRequest;
use rstest::{fixture, rstest};

const START: i64 = 1_700_000_000;

struct World {
    store: Arc<InMemoryStore>,
    cache: Arc<InMemoryCache>,
    clock: Arc<MutableClock>,
    log: InMemoryPostLog,
    graph: SocialGraphService,
    posts: PostService,
}

impl World {
    async fn sign_up(&self, username: &str) -> User {
        let request = SignUpRequest::try_from_parts(
            username,
            "Behaviour Tester",
            &format!("{username}@example.com"),
            "19900101",
            "correct horse",
        )
        .expect("valid sign-up request");
        self.graph.sign_up(request).await.expect("sign-up succeeds")
    }

    async fn users(&self, count: usize) -> Vec<UserId> {
        let mut ids = Vec::with_capacity(count);
        for n in 0..count {
            ids.push(self.sign_up(&format!("member{n:03}")).await.id());
        }
        ids
    }

    fn tick(&self) {
        self.clock.advance(Duration::from_secs(1));
    }
}

#[fixture]
fn world() -> World {
    let store = Arc::new(InMemoryStore::new());
    let cache = Arc::new(InMemoryCache::new());
    let clock = Arc::new(MutableClock::at_epoch_seconds(START));
    let log = InMemoryPostLog::new(4);

    let graph = SocialGraphService::new(
        SocialGraphPorts {
            users: store.clone(),
            follows: store.clone(),
            posts: store.clone(),
            hasher: Arc::new(PlaintextHasher),
        },
        SocialGraphCaches {
            users: Some(cache.clone() as Arc<dyn UserCache>),
            feed: Some(cache.clone() as Arc<dyn FeedCache>),
        },
        clock.clone(),
    );
    let posts = PostService::new(
        store.clone(),
        store.clone(),
        Arc::new(log.clone()),
        clock.clone(),
    );

    World {
        store,
        cache,
        clock,
        log,
        graph,
        posts,
    }
}

#[rstest]
#[tokio::test]
async fn usernames_are_validated_and_unique(world: World) {
    let short = SignUpRequest::try_from_parts(
        "bob",
        "Bob Builder",
        "bob@example.com",
        "19900101",
        "correct horse",
    )
    .map_err(newsfeed::domain::Error::from)
    .expect_err("three characters is too short");
    assert_eq!(short.code(), ErrorCode::InvalidRequest);

    world.sign_up("alice").await;
    let request = SignUpRequest::try_from_parts(
        "alice",
        "Another Alice",
        "other@example.com",
        "19900101",
        "correct horse",
    )
    .expect("valid sign-up request");
    let repeat = world
        .graph
        .sign_up(request)
        .await
        .expect_err("username already taken");
    assert_eq!(repeat.code(), ErrorCode::Conflict);
}

#[rstest]
#[tokio::test]
async fn following_twice_leaves_one_active_edge(world: World) {
    let ids = world.users(2).await;
    let (follower, following) = (ids[0], ids[1]);

    let first = world.graph.follow(follower, following).await.expect("follow");
    world.tick();
    let second = world.graph.follow(follower, following).await.expect("follow again");

    assert_eq!(world.store.edge_count(), 1);
    assert_eq!(first.edge.followed_at, second.edge.followed_at);
    assert!(!second.edge.removed);
}

#[rstest]
#[tokio::test]
async fn refollowing_reactivates_with_a_fresh_timestamp(world: World) {
    let ids = world.users(2).await;
    let (follower, following) = (ids[0], ids[1]);

    let first = world.graph.follow(follower, following).await.expect("follow");
    world.tick();
    world
        .graph
        .unfollow(follower, following)
        .await
        .expect("unfollow");
    assert!(
        world
            .store
            .edge(follower, following)
            .expect("edge kept")
            .removed
    );

    world.tick();
    let again = world.graph.follow(follower, following).await.expect("refollow");
    assert!(!again.edge.removed);
    assert!(again.edge.followed_at >= first.edge.followed_at);
    assert_eq!(world.store.edge_count(), 1);
}

#[rstest]
#[case(7, 3)]
#[case(5, 5)]
#[case(4, 10)]
#[tokio::test]
async fn follower_pages_cover_every_edge_once_newest_first(
    world: World,
    #[case] total: usize,
    #[case] page_size: usize,
) {
    let ids = world.users(total + 1).await;
    let target = ids[0];
    for follower in &ids[1..] {
        world.tick();
        world.graph.follow(*follower, target).await.expect("follow");
    }

    let mut seen = Vec::new();
    let mut request = PageRequest::first_page(page_size).expect("valid limit");
    loop {
        let page = world
            .graph
            .get_followers(target, &request)
            .await
            .expect("followers page");
        assert!(page.len() <= page_size);
        let next = page.next_cursor();
        seen.extend(page.into_items().into_iter().map(|entry| entry.user.id()));
        match next {
            Some(cursor) => {
                request = PageRequest::new(Some(cursor), page_size).expect("valid limit");
            }
            None => break,
        }
    }

    let expected: Vec<UserId> = ids[1..].iter().rev().copied().collect();
    assert_eq!(seen, expected);
}

#[rstest]
#[tokio::test]
async fn equal_follow_times_paginate_without_gaps(world: World) {
    let ids = world.users(6).await;
    let follower = ids[0];
    for following in &ids[1..] {
        world.graph.follow(follower, *following).await.expect("follow");
    }

    let mut seen = Vec::new();
    let mut request = PageRequest::first_page(2).expect("valid limit");
    loop {
        let page = world
            .graph
            .get_followings(follower, &request)
            .await
            .expect("followings page");
        let next = page.next_cursor();
        seen.extend(page.into_items().into_iter().map(|entry| entry.user.id()));
        match next {
            Some(cursor) => request = PageRequest::new(Some(cursor), 2).expect("valid limit"),
            None => break,
        }
    }

    seen.sort();
    let mut expected = ids[1..].to_vec();
    expected.sort();
    assert_eq!(seen, expected);
}

#[rstest]
#[tokio::test]
async fn follow_lists_match_the_store_when_the_cache_fails(world: World) {
    let ids = world.users(4).await;
    for following in &ids[1..] {
        world.tick();
        world.graph.follow(ids[0], *following).await.expect("follow");
    }
    let request = PageRequest::first_page(10).expect("valid limit");
    let cached = world
        .graph
        .get_followings(ids[0], &request)
        .await
        .expect("cached followings");

    world.cache.set_failing(true);
    let degraded = world
        .graph
        .get_followings(ids[0], &request)
        .await
        .expect("store followings");
    world.cache.set_failing(false);
    world.cache.flush();
    let missed = world
        .graph
        .get_followings(ids[0], &request)
        .await
        .expect("followings after flush");

    assert_eq!(degraded.items(), cached.items());
    assert_eq!(missed.items(), cached.items());
}

#[rstest]
#[tokio::test]
async fn newsfeed_is_rebuilt_from_the_store_without_feed_entries(world: World) {
    let ids = world.users(2).await;
    let (reader, author) = (ids[0], ids[1]);
    world.graph.follow(reader, author).await.expect("follow");

    world.tick();
    let post = world
        .posts
        .create_post(author, PostContent::new("hello feed").expect("valid content"))
        .await
        .expect("post created");

    let page = world
        .graph
        .get_newsfeed(reader, &PageRequest::first_page(10).expect("valid limit"))
        .await
        .expect("newsfeed");
    assert_eq!(page.items(), std::slice::from_ref(&post));
}

#[rstest]
#[tokio::test]
async fn publish_failure_fails_post_creation(world: World) {
    let author = world.users(1).await[0];
    world.log.set_unavailable(true);

    let error = world
        .posts
        .create_post(author, PostContent::new("lost event").expect("valid content"))
        .await
        .expect_err("publish fails");
    assert_eq!(error.code(), ErrorCode::PublishFailure);

    let timeline = world
        .posts
        .get_posts_by_author(author, &PageRequest::first_page(10).expect("valid limit"))
        .await
        .expect("timeline");
    assert_eq!(timeline.len(), 1);
}

#[rstest]
#[tokio::test]
async fn posts_from_unknown_authors_are_rejected(world: World) {
    let missing = UserId::new(404).expect("valid id");
    let error = world
        .posts
        .create_post(missing, PostContent::new("ghost").expect("valid content"))
        .await
        .expect_err("author does not exist");
    assert_eq!(error.code(), ErrorCode::NotFound);
}
