//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod credential_hasher;
mod fanout_metrics;
mod follow_repository;
mod post_events;
mod post_repository;
mod social_cache;
mod user_repository;

#[cfg(test)]
pub use credential_hasher::MockCredentialHasher;
pub use credential_hasher::{CredentialHashError, CredentialHasher};
#[cfg(test)]
pub use fanout_metrics::MockFanoutMetrics;
pub use fanout_metrics::{DropReason, FanoutMetrics, FanoutMetricsError, NoOpFanoutMetrics};
#[cfg(test)]
pub use follow_repository::MockFollowRepository;
pub use follow_repository::{FollowPersistenceError, FollowRepository};
#[cfg(test)]
pub use post_events::{MockPostEventPublisher, MockPostEventSource, MockPostEventSubscription};
pub use post_events::{
    Delivery, EventSourceError, PostCreatedEvent, PostEventPublisher, PostEventRecord,
    PostEventSource, PostEventSubscription, PublishError, RecordPosition,
};
#[cfg(test)]
pub use post_repository::MockPostRepository;
pub use post_repository::{PostPersistenceError, PostRepository};
#[cfg(test)]
pub use social_cache::{MockFeedCache, MockUserCache};
pub use social_cache::{CacheError, FeedCache, UserCache};
#[cfg(test)]
pub use user_repository::MockUserRepository;
pub use user_repository::{UserPersistenceError, UserRepository};
