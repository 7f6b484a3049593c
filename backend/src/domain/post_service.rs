//! Post creation and author timelines.
//!
//! Creating a post persists it and then publishes a `PostCreated` event for
//! the fan-out consumer. The request succeeds only once both steps have.

use std::sync::Arc;

use mockable::Clock;
use pagination::{Page, PageRequest};
use tracing::{error, info};

use crate::domain::ports::{PostCreatedEvent, PostEventPublisher, PostRepository, UserRepository};
use crate::domain::social_graph::mapping::{map_post_error, map_user_error};
use crate::domain::{Error, Post, PostContent, UserId};

/// Domain service for writing posts and reading author timelines.
#[derive(Clone)]
pub struct PostService {
    users: Arc<dyn UserRepository>,
    posts: Arc<dyn PostRepository>,
    publisher: Arc<dyn PostEventPublisher>,
    clock: Arc<dyn Clock>,
}

impl PostService {
    /// Wire the service to its store, publisher, and clock.
    pub fn new(
        users: Arc<dyn UserRepository>,
        posts: Arc<dyn PostRepository>,
        publisher: Arc<dyn PostEventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            posts,
            publisher,
            clock,
        }
    }

    async fn ensure_user(&self, id: UserId) -> Result<(), Error> {
        self.users
            .find_by_id(id)
            .await
            .map_err(map_user_error)?
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("user {id} not found")))
    }

    /// Store a post for `author` and publish it for fan-out.
    ///
    /// A publish failure is reported as [`crate::domain::ErrorCode::PublishFailure`]
    /// with the stored post id in the details. The post itself stays
    /// stored and remains visible through store-side feed reads.
    pub async fn create_post(&self, author: UserId, content: PostContent) -> Result<Post, Error> {
        self.ensure_user(author).await?;

        let created_at = self.clock.utc().timestamp();
        let post = self
            .posts
            .create(author, &content, created_at)
            .await
            .map_err(map_post_error)?;

        let event = PostCreatedEvent::new(post.clone());
        match self.publisher.publish(&event).await {
            Ok(position) => {
                info!(
                    post_id = %post.id,
                    author_id = %author,
                    partition = position.partition,
                    offset = position.offset,
                    "post published"
                );
                Ok(post)
            }
            Err(err) => {
                error!(post_id = %post.id, author_id = %author, error = %err, "post publish failed");
                Err(Error::publish("post was stored but could not be published")
                    .with_details(serde_json::json!({ "postId": post.id.get() })))
            }
        }
    }

    /// Posts written by `author`, newest first.
    pub async fn get_posts_by_author(
        &self,
        author: UserId,
        request: &PageRequest,
    ) -> Result<Page<Post>, Error> {
        self.ensure_user(author).await?;
        let posts = self
            .posts
            .list_by_author(author, request)
            .await
            .map_err(map_post_error)?;
        Ok(Page::from_ordered(posts, request))
    }
}
