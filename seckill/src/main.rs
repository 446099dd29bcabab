//! Seckill process.
//!
//! Connects to Redis, `PostgreSQL` and Redpanda, wires the services and runs
//! the order consumer, reconciler and stock flusher until Ctrl+C or SIGTERM.

use anyhow::Context;
use seckill::app::{Ports, Services};
use seckill::client::{ActivityClient, OrderClient};
use seckill::config::Config;
use seckill::supervisor::Supervisor;
use seckill_core::environment::SystemClock;
use seckill_postgres::{PoolConfig, PostgresActivityRepository, PostgresOrderRepository};
use seckill_redis::{RedisActivityCache, RedisLock, RedisParticipationLedger, RedisStockStore};
use seckill_redpanda::RedpandaBroker;
use seckill_runtime::metrics::MetricsServer;
use seckill_runtime::retry::{RetryPolicy, retry_with_backoff};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seckill=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting seckill");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        redis_url = %config.redis.url,
        redpanda_brokers = %config.redpanda.brokers,
        order_topic = %config.redpanda.order_topic,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.server.metrics_addr);
    metrics.start().context("Failed to start metrics server")?;

    let policy = RetryPolicy::default();

    info!("Connecting to Redis...");
    let redis = retry_with_backoff(&policy, "connect redis", || {
        seckill_redis::connect(&config.redis.url)
    })
    .await
    .context("Failed to connect to Redis")?;

    info!("Connecting to PostgreSQL...");
    let pool_config = PoolConfig {
        max_connections: config.postgres.max_connections,
        min_connections: config.postgres.min_connections,
        acquire_timeout: config.postgres.connect_timeout,
    };
    let pool = retry_with_backoff(&policy, "connect postgres", || {
        seckill_postgres::connect(&config.postgres.url, &pool_config)
    })
    .await
    .context("Failed to connect to PostgreSQL")?;
    seckill_postgres::migrate(&pool)
        .await
        .context("Failed to apply migrations")?;

    info!("Connecting to Redpanda...");
    let broker = RedpandaBroker::builder()
        .brokers(&config.redpanda.brokers)
        .consumer_group(&config.redpanda.consumer_group)
        .timeout(config.redpanda.producer_timeout)
        .auto_offset_reset(&config.redpanda.auto_offset_reset)
        .build()
        .context("Failed to create Redpanda broker")?;

    let tuning = &config.seckill;
    let ports = Ports {
        stock: Arc::new(RedisStockStore::new(redis.clone())),
        lock: Arc::new(RedisLock::new(redis.clone())),
        ledger: Arc::new(RedisParticipationLedger::new(redis.clone(), tuning.participation_ttl)),
        cache: Arc::new(RedisActivityCache::new(redis, tuning.cache_ttl)),
        activities: Arc::new(PostgresActivityRepository::new(pool.clone())),
        orders: Arc::new(PostgresOrderRepository::new(pool)),
        broker: Arc::new(broker),
        clock: Arc::new(SystemClock),
    };

    let mut supervisor = Supervisor::new();
    let (activities, orders) = Services::new(ports, tuning, config.redpanda.order_topic.clone())
        .start(&mut supervisor, config.redpanda.resubscribe_delay);

    // Held for the life of the process; the transport layer serves requests through them.
    let _clients: (Arc<dyn ActivityClient>, Arc<dyn OrderClient>) =
        (Arc::new(activities), Arc::new(orders));

    info!(tasks = supervisor.len(), "Seckill ready");

    shutdown_signal().await;

    supervisor.shutdown(config.server.shutdown_timeout).await;
    info!("Seckill stopped");
    Ok(())
}

/// Wait for Ctrl+C (SIGINT) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
