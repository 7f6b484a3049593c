//! Fan-out worker entry-point: consumes `PostCreated` events and appends
//! each post to every follower's cached newsfeed.

use std::sync::Arc;

use color_eyre::eyre::{Context, Result, eyre};
use mockable::DefaultClock;
use ortho_config::OrthoConfig;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use newsfeed::config::NewsfeedSettings;
use newsfeed::domain::{
    FanoutConsumer, FanoutConsumerConfig, NewsfeedFanout, NewsfeedFanoutConfig,
};
use newsfeed::outbound::cache::{RedisCacheConfig, RedisSocialCache};
use newsfeed::outbound::metrics::FanoutCounters;
use newsfeed::outbound::persistence::{
    DbPool, DieselFollowRepository, PoolConfig, run_pending_migrations,
};
use newsfeed::outbound::queue::{PostgresLogConfig, PostgresPostLog};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings = NewsfeedSettings::load_from_iter(std::env::args_os())
        .wrap_err("load newsfeed settings")?;
    let database_url = settings
        .database_url
        .clone()
        .ok_or_else(|| eyre!("NEWSFEED_DATABASE_URL must be set"))?;
    let redis_url = settings
        .redis_url
        .clone()
        .ok_or_else(|| eyre!("NEWSFEED_REDIS_URL must be set for the fan-out worker"))?;

    run_pending_migrations(&database_url)
        .await
        .wrap_err("apply database migrations")?;
    let pool = DbPool::new(PoolConfig::new(database_url).with_max_size(settings.db_pool_size()))
        .await
        .wrap_err("build database pool")?;

    let cache = RedisSocialCache::connect(
        RedisCacheConfig::new(redis_url).with_snapshot_ttl(settings.profile_ttl()),
    )
    .await
    .wrap_err("connect to redis")?;

    let log = PostgresPostLog::new(
        pool.clone(),
        PostgresLogConfig {
            partitions: settings.partition_count(),
            poll_interval: settings.poll_interval(),
            claim_lease: settings.claim_lease(),
            max_batch: settings.fanout_batch_size(),
        },
    );

    let fanout = NewsfeedFanout::new(
        Arc::new(DieselFollowRepository::new(pool)),
        Arc::new(cache),
        NewsfeedFanoutConfig {
            batch_size: settings.fanout_batch_size(),
            max_feed_entries: settings.max_feed_entries(),
        },
    );

    let mut consumer_config = FanoutConsumerConfig {
        group: settings.consumer_group().to_owned(),
        max_attempts: settings.max_attempts(),
        shutdown_grace: settings.shutdown_grace(),
        ..FanoutConsumerConfig::default()
    };
    if let Some(member) = &settings.member_id {
        consumer_config.member.clone_from(member);
    }

    let counters = Arc::new(FanoutCounters::new());
    let consumer = FanoutConsumer::new(
        Arc::new(log),
        Arc::new(fanout),
        counters.clone(),
        Arc::new(DefaultClock),
        consumer_config,
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let (ready_tx, ready_rx) = oneshot::channel();
    tokio::spawn(async move {
        if ready_rx.await.is_ok() {
            info!("fan-out worker ready");
        }
    });

    let report = consumer
        .run(cancel, ready_tx)
        .await
        .wrap_err("run fan-out consumer")?;

    let snapshot = counters.snapshot();
    info!(
        processed = report.processed,
        dropped = report.dropped,
        rebalances = report.rebalances,
        delivered_entries = snapshot.delivered_entries,
        retries = snapshot.retries,
        dropped_malformed = snapshot.dropped_malformed,
        dropped_exhausted = snapshot.dropped_exhausted,
        "fan-out worker stopped"
    );
    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "failed to listen for shutdown signal");
            // Keep running until the process is killed externally.
            std::future::pending::<()>().await;
        }
    }
    cancel.cancel();
}
