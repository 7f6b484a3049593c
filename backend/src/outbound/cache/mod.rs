//! Redis cache adapter for the social graph and newsfeeds.
//!
//! One [`RedisSocialCache`] implements both the `UserCache` and `FeedCache`
//! ports over a shared `bb8-redis` pool. Key layout lives in [`keys`]:
//!
//! - `newsfeed:v1:user:{id}`: user snapshot (JSON, jittered TTL)
//! - `newsfeed:v1:user:{id}:followings`: sorted set scored by follow time
//! - `newsfeed:v1:user:{id}:newsfeed`: sorted set scored by post time
//! - `newsfeed:v1:post:{id}`: post snapshot (JSON, jittered TTL)
//!
//! The cache is never authoritative; callers treat every failure as a miss.

pub mod keys;
mod redis_social_cache;

pub use redis_social_cache::{RedisCacheConfig, RedisSocialCache};
