//! `PostgreSQL` repositories for seckill.
//!
//! This crate implements the durable-tier ports from `seckill-core`:
//!
//! - [`PostgresActivityRepository`] for activity records and the stock mirror
//! - [`PostgresOrderRepository`] for orders and their status transitions
//!
//! Schema lives in `migrations/` and is applied with [`migrate`].
//!
//! # Example
//!
//! ```no_run
//! use seckill_postgres::{PoolConfig, PostgresOrderRepository, connect, migrate};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = connect("postgres://localhost/seckill", &PoolConfig::default()).await?;
//! migrate(&pool).await?;
//! let orders = PostgresOrderRepository::new(pool);
//! # let _ = orders;
//! # Ok(())
//! # }
//! ```

mod activity;
mod order;

pub use activity::PostgresActivityRepository;
pub use order::PostgresOrderRepository;
pub use sqlx::PgPool;

use seckill_core::error::RepositoryError;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Connection pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on open connections
    pub max_connections: u32,
    /// Idle connections kept open
    pub min_connections: u32,
    /// How long to wait for a free connection
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`RepositoryError::ConnectionFailed`] if the database is unreachable.
pub async fn connect(database_url: &str, config: &PoolConfig) -> Result<PgPool, RepositoryError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(database_url)
        .await
        .map_err(|e| RepositoryError::ConnectionFailed(e.to_string()))?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Connected to PostgreSQL"
    );
    Ok(pool)
}

/// Apply pending migrations.
///
/// # Errors
///
/// Returns [`RepositoryError::QueryFailed`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), RepositoryError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| RepositoryError::QueryFailed(format!("migration failed: {e}")))?;

    tracing::info!("Database migrations applied");
    Ok(())
}

/// Maps unique violations to [`RepositoryError::Duplicate`].
pub(crate) fn query_failed(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Duplicate(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepositoryError::ConnectionFailed(err.to_string())
        }
        _ => RepositoryError::QueryFailed(err.to_string()),
    }
}
