//! Follow relationships between users.

use pagination::Keyed;
use serde::{Deserialize, Serialize};

use super::user::{User, UserId};

/// Directed "follower follows following" relationship.
///
/// ## Invariants
/// - At most one edge exists per ordered `(follower, following)` pair.
/// - `followed_at` is epoch seconds of the most recent (re)activation.
/// - `removed` marks a soft-deleted edge; re-following clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowEdge {
    /// User doing the following.
    pub follower_id: UserId,
    /// User being followed.
    pub following_id: UserId,
    /// Epoch seconds of the latest activation.
    pub followed_at: i64,
    /// Soft-delete marker.
    pub removed: bool,
}

impl FollowEdge {
    /// Whether the edge currently counts as a follow.
    pub fn is_active(&self) -> bool {
        !self.removed
    }

    /// The followed user as a member of the follower's list.
    pub fn as_following(&self) -> FollowMember {
        FollowMember {
            user_id: self.following_id,
            followed_at: self.followed_at,
        }
    }

    /// The follower as a member of the followed user's list.
    pub fn as_follower(&self) -> FollowMember {
        FollowMember {
            user_id: self.follower_id,
            followed_at: self.followed_at,
        }
    }
}

/// Ordered pair of distinct users participating in a follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowPair {
    follower: UserId,
    following: UserId,
}

/// Error returned when a user tries to follow themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a user cannot follow themselves")]
pub struct SelfFollowError;

impl FollowPair {
    /// Validate that the two ids differ.
    pub fn new(follower: UserId, following: UserId) -> Result<Self, SelfFollowError> {
        if follower == following {
            return Err(SelfFollowError);
        }
        Ok(Self {
            follower,
            following,
        })
    }

    /// User doing the following.
    pub fn follower(&self) -> UserId {
        self.follower
    }

    /// User being followed.
    pub fn following(&self) -> UserId {
        self.following
    }
}

/// Result of a follow: the stored edge plus both participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Follow {
    /// The active edge after the write.
    pub edge: FollowEdge,
    /// Profile of the follower.
    pub follower: User,
    /// Profile of the followed user.
    pub following: User,
}

/// One row of a follow list: the other user and when the follow happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowListEntry {
    /// The other side of the edge.
    pub user: User,
    /// Epoch seconds of the follow.
    pub followed_at: i64,
}

impl Keyed for FollowListEntry {
    fn score(&self) -> i64 {
        self.followed_at
    }

    fn tie_key(&self) -> i64 {
        self.user.id().get()
    }
}

/// Bare follow list member: the other user's id and the follow time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowMember {
    /// The other side of the edge.
    pub user_id: UserId,
    /// Epoch seconds of the follow.
    pub followed_at: i64,
}

impl Keyed for FollowMember {
    fn score(&self) -> i64 {
        self.followed_at
    }

    fn tie_key(&self) -> i64 {
        self.user_id.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn id(raw: i64) -> UserId {
        UserId::new(raw).expect("valid id")
    }

    #[rstest]
    fn self_follow_is_rejected() {
        assert_eq!(FollowPair::new(id(3), id(3)), Err(SelfFollowError));
    }

    #[rstest]
    fn pair_preserves_direction() {
        let pair = FollowPair::new(id(1), id(2)).expect("distinct users");
        assert_eq!((pair.follower(), pair.following()), (id(1), id(2)));
    }

    #[rstest]
    fn follow_members_break_ties_on_user_id() {
        let entry = FollowMember {
            user_id: id(9),
            followed_at: 100,
        };
        assert_eq!((entry.score(), entry.tie_key()), (100, 9));
    }
}
