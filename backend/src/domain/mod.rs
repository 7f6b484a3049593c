//! Domain primitives, services, and ports.
//!
//! Purpose: define strongly typed entities for the social graph and the
//! newsfeed, the services that enforce the cache-aside protocol over them,
//! and the fan-out consumer that materialises feeds. Adapters live in
//! [`crate::outbound`] and plug in through [`ports`].
//!
//! Public surface:
//! - Error / ErrorCode: transport-agnostic failure payload.
//! - User, Follow, Post value types and their validation errors.
//! - SocialGraphService, PostService, NewsfeedFanout, FanoutConsumer.

pub mod auth;
pub mod error;
pub mod follow;
pub mod newsfeed_fanout;
pub mod ports;
pub mod post;
mod post_service;
mod social_graph;
pub mod user;

pub use self::auth::{
    HashedCredential, LoginCredentials, LoginValidationError, Password, SignUpRequest,
    SignUpValidationError, UserAccount,
};
pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::follow::{
    Follow, FollowEdge, FollowListEntry, FollowMember, FollowPair, SelfFollowError,
};
pub use self::newsfeed_fanout::{
    AttemptJitter, BackoffJitter, ConsumerReport, ConsumerState, FanoutConsumer,
    FanoutConsumerConfig, FanoutOutcome, FanoutRuntime, NewsfeedFanout, NewsfeedFanoutConfig,
    RetrySleeper, TokioSleeper,
};
pub use self::post::{FeedEntry, Post, PostContent, PostId, PostValidationError};
pub use self::post_service::PostService;
pub use self::social_graph::{SocialGraphCaches, SocialGraphPorts, SocialGraphService};
pub use self::user::{
    DateOfBirth, DisplayName, Email, User, UserId, UserProfile, UserValidationError, Username,
};

/// Convenient domain result alias.
pub type DomainResult<T> = Result<T, Error>;
