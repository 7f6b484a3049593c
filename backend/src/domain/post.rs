//! Posts and the per-user feed entries derived from them.

use std::fmt;

use pagination::Keyed;
use serde::{Deserialize, Serialize};

use super::user::UserId;

/// Maximum post length in characters after trimming.
pub const POST_CONTENT_MAX: usize = 2000;

/// Validation errors for post values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PostValidationError {
    #[error("post id must be a positive integer")]
    InvalidId,
    #[error("post content must not be empty")]
    EmptyContent,
    #[error("post content must be at most {max} characters")]
    ContentTooLong { max: usize },
}

/// Store-assigned post identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct PostId(i64);

impl PostId {
    /// Validate a store-assigned id; ids are positive.
    pub fn new(id: i64) -> Result<Self, PostValidationError> {
        if id <= 0 {
            return Err(PostValidationError::InvalidId);
        }
        Ok(Self(id))
    }

    /// Raw id value.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<PostId> for i64 {
    fn from(value: PostId) -> Self {
        value.0
    }
}

impl TryFrom<i64> for PostId {
    type Error = PostValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Trimmed, bounded post body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PostContent(String);

impl PostContent {
    /// Trim `raw` and check it is non-empty and within the length limit.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, PostValidationError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(PostValidationError::EmptyContent);
        }
        if trimmed.chars().count() > POST_CONTENT_MAX {
            return Err(PostValidationError::ContentTooLong {
                max: POST_CONTENT_MAX,
            });
        }
        Ok(Self(trimmed.to_owned()))
    }
}

impl AsRef<str> for PostContent {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl From<PostContent> for String {
    fn from(value: PostContent) -> Self {
        value.0
    }
}

impl TryFrom<String> for PostContent {
    type Error = PostValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Immutable published post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// Store-assigned id, also the feed tie-break key.
    pub id: PostId,
    /// Author of the post.
    pub author_id: UserId,
    /// Post body.
    pub content: PostContent,
    /// Creation time in epoch seconds.
    pub created_at: i64,
}

impl Keyed for Post {
    fn score(&self) -> i64 {
        self.created_at
    }

    fn tie_key(&self) -> i64 {
        self.id.get()
    }
}

/// A post placed in one recipient's feed.
///
/// Feed entries are derived data: they can be rebuilt from posts and the
/// follow graph at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedEntry {
    /// Post the entry points at.
    pub post_id: PostId,
    /// The post's creation time, used as the feed score.
    pub created_at: i64,
}

impl Keyed for FeedEntry {
    fn score(&self) -> i64 {
        self.created_at
    }

    fn tie_key(&self) -> i64 {
        self.post_id.get()
    }
}

impl From<&Post> for FeedEntry {
    fn from(value: &Post) -> Self {
        Self {
            post_id: value.id,
            created_at: value.created_at,
        }
    }
}
