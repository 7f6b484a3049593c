//! Versioned Redis key layout.
//!
//! Bumping [`KEY_VERSION`] orphans every existing entry at once, which is
//! how incompatible snapshot formats are rolled out.

use crate::domain::{PostId, UserId};

/// Namespace shared by every key this adapter writes.
pub const KEY_NAMESPACE: &str = "newsfeed";

/// Schema version segment.
pub const KEY_VERSION: &str = "v1";

/// JSON snapshot of one user.
pub fn user_key(id: UserId) -> String {
    format!("{KEY_NAMESPACE}:{KEY_VERSION}:user:{id}")
}

/// Sorted set of users followed by `id`, scored by follow time.
pub fn followings_key(id: UserId) -> String {
    format!("{}:followings", user_key(id))
}

/// Sorted set of post ids in `id`'s feed, scored by post creation time.
pub fn feed_key(id: UserId) -> String {
    format!("{}:newsfeed", user_key(id))
}

/// JSON snapshot of one post.
pub fn post_key(id: PostId) -> String {
    format!("{KEY_NAMESPACE}:{KEY_VERSION}:post:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn user(raw: i64) -> UserId {
        UserId::new(raw).expect("valid id")
    }

    #[rstest]
    fn user_keys_share_a_prefix() {
        assert_eq!(user_key(user(42)), "newsfeed:v1:user:42");
        assert_eq!(followings_key(user(42)), "newsfeed:v1:user:42:followings");
        assert_eq!(feed_key(user(42)), "newsfeed:v1:user:42:newsfeed");
    }

    #[rstest]
    fn post_keys_live_beside_users() {
        assert_eq!(
            post_key(PostId::new(50).expect("valid id")),
            "newsfeed:v1:post:50"
        );
    }
}
