use crate::query_failed;
use futures::future::BoxFuture;
use seckill_core::error::RepositoryError;
use seckill_core::repository::ActivityRepository;
use seckill_core::types::{Activity, ActivityId, Money, NewActivity, ProductId};
use sqlx::{PgPool, Row};

const ACTIVITY_COLUMNS: &str = "id, name, product_id, seckill_price_cents, total_stock, \
     available_stock, start_time, end_time, enabled";

/// `PostgreSQL`-backed [`ActivityRepository`].
#[derive(Clone)]
pub struct PostgresActivityRepository {
    pool: PgPool,
}

impl PostgresActivityRepository {
    /// Repository over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_activity(row: &sqlx::postgres::PgRow) -> Activity {
        Activity {
            id: ActivityId::new(row.get("id")),
            name: row.get("name"),
            product_id: ProductId::new(row.get("product_id")),
            seckill_price: Money::from_cents(row.get("seckill_price_cents")),
            total_stock: row.get("total_stock"),
            available_stock: row.get("available_stock"),
            start_time: row.get("start_time"),
            end_time: row.get("end_time"),
            enabled: row.get("enabled"),
        }
    }
}

impl ActivityRepository for PostgresActivityRepository {
    fn create(&self, activity: NewActivity) -> BoxFuture<'_, Result<Activity, RepositoryError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                r"
                INSERT INTO activities (
                    name, product_id, seckill_price_cents, total_stock,
                    available_stock, start_time, end_time, enabled
                ) VALUES ($1, $2, $3, $4, $4, $5, $6, TRUE)
                RETURNING {ACTIVITY_COLUMNS}
                "
            ))
            .bind(&activity.name)
            .bind(activity.product_id.get())
            .bind(activity.seckill_price.cents())
            .bind(activity.total_stock)
            .bind(activity.start_time)
            .bind(activity.end_time)
            .fetch_one(&self.pool)
            .await
            .map_err(query_failed)?;

            let created = Self::row_to_activity(&row);
            tracing::info!(activity_id = %created.id, name = %created.name, "Activity persisted");
            Ok(created)
        })
    }

    fn get(&self, id: ActivityId) -> BoxFuture<'_, Result<Option<Activity>, RepositoryError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = $1"
            ))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed)?;

            Ok(row.as_ref().map(Self::row_to_activity))
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<Activity>, RepositoryError>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {ACTIVITY_COLUMNS} FROM activities ORDER BY created_at DESC, id DESC"
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed)?;

            Ok(rows.iter().map(Self::row_to_activity).collect())
        })
    }

    fn update_available_stock(
        &self,
        id: ActivityId,
        stock: i64,
    ) -> BoxFuture<'_, Result<(), RepositoryError>> {
        Box::pin(async move {
            sqlx::query(
                "UPDATE activities SET available_stock = $1, updated_at = now() WHERE id = $2",
            )
            .bind(stock)
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(query_failed)?;

            metrics::counter!("seckill_stock_mirror_writes_total").increment(1);
            Ok(())
        })
    }

    fn set_enabled(
        &self,
        id: ActivityId,
        enabled: bool,
    ) -> BoxFuture<'_, Result<bool, RepositoryError>> {
        Box::pin(async move {
            let result =
                sqlx::query("UPDATE activities SET enabled = $1, updated_at = now() WHERE id = $2")
                    .bind(enabled)
                    .bind(id.get())
                    .execute(&self.pool)
                    .await
                    .map_err(query_failed)?;

            let changed = result.rows_affected() == 1;
            if changed {
                tracing::info!(activity_id = %id, enabled, "Activity availability changed");
            }
            Ok(changed)
        })
    }
}
