//! Worker configuration loaded via OrthoConfig.
//!
//! Values come from CLI flags, `NEWSFEED_*` environment variables, and
//! configuration files, in OrthoConfig's usual precedence. Optional fields
//! expose accessors that apply the documented defaults; the partition count
//! carries its default on the field itself.

use std::time::Duration;

use ortho_config::OrthoConfig;
use pagination::MAX_LIMIT;
use serde::Deserialize;

const DEFAULT_CONSUMER_GROUP: &str = "newsfeed-fanout";
const DEFAULT_MAX_FEED_ENTRIES: usize = 800;
const DEFAULT_PROFILE_TTL_SECS: u64 = 3600;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_CLAIM_LEASE_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
const DEFAULT_DB_POOL_SIZE: u32 = 10;

/// Settings for the fan-out worker and the adapters it wires together.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "NEWSFEED")]
pub struct NewsfeedSettings {
    /// PostgreSQL connection URL. Required.
    pub database_url: Option<String>,
    /// Redis connection URL. Without it the cache is disabled.
    pub redis_url: Option<String>,
    /// Consumer group shared by every worker process.
    pub consumer_group: Option<String>,
    /// Member id for this process; random when unset.
    pub member_id: Option<String>,
    /// Number of log partitions.
    #[ortho_config(default = 16)]
    pub partition_count: u32,
    /// Followers resolved per fan-out batch, capped at the page limit.
    pub fanout_batch_size: Option<usize>,
    /// Feed length kept per user; `0` disables trimming.
    pub max_feed_entries: Option<usize>,
    /// Lifetime of cached user and post snapshots.
    pub profile_ttl_secs: Option<u64>,
    /// Wait before an empty poll reports idle.
    pub poll_interval_ms: Option<u64>,
    /// Lifetime of consumer heartbeats and partition claims.
    pub claim_lease_secs: Option<u64>,
    /// Fan-out attempts per record, including the first.
    pub max_attempts: Option<u32>,
    /// Time an in-flight record may keep running after shutdown starts.
    pub shutdown_grace_secs: Option<u64>,
    /// Maximum PostgreSQL connections.
    pub db_pool_size: Option<u32>,
}

impl NewsfeedSettings {
    /// Consumer group name, `newsfeed-fanout` by default.
    pub fn consumer_group(&self) -> &str {
        self.consumer_group
            .as_deref()
            .unwrap_or(DEFAULT_CONSUMER_GROUP)
    }

    /// Partition count, 16 by default and never below one.
    pub fn partition_count(&self) -> u32 {
        self.partition_count.max(1)
    }

    /// Fan-out batch size, clamped to `1..=100` and defaulting to 100.
    pub fn fanout_batch_size(&self) -> usize {
        self.fanout_batch_size
            .unwrap_or(MAX_LIMIT)
            .clamp(1, MAX_LIMIT)
    }

    /// Feed trim length, 800 by default. `None` means feeds are not trimmed.
    pub fn max_feed_entries(&self) -> Option<usize> {
        match self.max_feed_entries.unwrap_or(DEFAULT_MAX_FEED_ENTRIES) {
            0 => None,
            entries => Some(entries),
        }
    }

    /// Snapshot TTL, one hour by default.
    pub fn profile_ttl(&self) -> Duration {
        Duration::from_secs(self.profile_ttl_secs.unwrap_or(DEFAULT_PROFILE_TTL_SECS))
    }

    /// Poll interval, 500 ms by default.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS))
    }

    /// Claim lease, 30 seconds by default.
    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs.unwrap_or(DEFAULT_CLAIM_LEASE_SECS))
    }

    /// Attempts per record, 5 by default and never below one.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1)
    }

    /// Shutdown grace period, 10 seconds by default.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(
            self.shutdown_grace_secs
                .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
        )
    }

    /// PostgreSQL pool size, 10 by default.
    pub fn db_pool_size(&self) -> u32 {
        self.db_pool_size.unwrap_or(DEFAULT_DB_POOL_SIZE)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for worker configuration parsing.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    const VARS: [&str; 7] = [
        "NEWSFEED_DATABASE_URL",
        "NEWSFEED_REDIS_URL",
        "NEWSFEED_CONSUMER_GROUP",
        "NEWSFEED_PARTITION_COUNT",
        "NEWSFEED_FANOUT_BATCH_SIZE",
        "NEWSFEED_MAX_FEED_ENTRIES",
        "NEWSFEED_POLL_INTERVAL_MS",
    ];

    fn load_from_empty_args() -> NewsfeedSettings {
        NewsfeedSettings::load_from_iter([OsString::from("newsfeed-fanout")])
            .expect("config should load")
    }

    #[rstest]
    fn defaults_apply_when_unset() {
        let _guard = lock_env(VARS.map(|name| (name, None::<String>)));

        let settings = load_from_empty_args();
        assert!(settings.database_url.is_none());
        assert!(settings.redis_url.is_none());
        assert_eq!(settings.consumer_group(), "newsfeed-fanout");
        assert_eq!(settings.partition_count(), 16);
        assert_eq!(settings.fanout_batch_size(), 100);
        assert_eq!(settings.max_feed_entries(), Some(800));
        assert_eq!(settings.poll_interval(), Duration::from_millis(500));
        assert_eq!(settings.max_attempts(), 5);
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let _guard = lock_env([
            (
                "NEWSFEED_DATABASE_URL",
                Some("postgres://localhost/newsfeed".to_owned()),
            ),
            ("NEWSFEED_REDIS_URL", Some("redis://localhost".to_owned())),
            ("NEWSFEED_CONSUMER_GROUP", Some("feeds".to_owned())),
            ("NEWSFEED_PARTITION_COUNT", Some("4".to_owned())),
            ("NEWSFEED_FANOUT_BATCH_SIZE", Some("25".to_owned())),
            ("NEWSFEED_MAX_FEED_ENTRIES", Some("0".to_owned())),
            ("NEWSFEED_POLL_INTERVAL_MS", Some("20".to_owned())),
        ]);

        let settings = load_from_empty_args();
        assert_eq!(
            settings.database_url.as_deref(),
            Some("postgres://localhost/newsfeed")
        );
        assert_eq!(settings.redis_url.as_deref(), Some("redis://localhost"));
        assert_eq!(settings.consumer_group(), "feeds");
        assert_eq!(settings.partition_count(), 4);
        assert_eq!(settings.fanout_batch_size(), 25);
        assert_eq!(settings.max_feed_entries(), None);
        assert_eq!(settings.poll_interval(), Duration::from_millis(20));
    }

    #[rstest]
    fn batch_size_is_clamped_to_the_page_limit() {
        let _guard = lock_env([("NEWSFEED_FANOUT_BATCH_SIZE", Some("5000".to_owned()))]);

        assert_eq!(load_from_empty_args().fanout_batch_size(), MAX_LIMIT);
    }

    #[rstest]
    fn zero_partitions_fall_back_to_one() {
        let _guard = lock_env([("NEWSFEED_PARTITION_COUNT", Some("0".to_owned()))]);

        assert_eq!(load_from_empty_args().partition_count(), 1);
    }
}
