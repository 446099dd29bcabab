use crate::query_failed;
use futures::future::BoxFuture;
use seckill_core::error::RepositoryError;
use seckill_core::repository::OrderRepository;
use seckill_core::types::{
    ActivityId, Money, NewOrder, Order, OrderId, OrderSerial, OrderStatus, ProductId, UserId,
};
use sqlx::{PgPool, Row};

const ORDER_COLUMNS: &str = "id, order_serial, user_id, activity_id, product_id, amount_cents, \
     price_cents, quantity, status, created_at";

/// `PostgreSQL`-backed [`OrderRepository`].
///
/// `order_serial` carries a unique index; a second insert with the same
/// serial fails with [`RepositoryError::Duplicate`].
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    /// Repository over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order, RepositoryError> {
        let status: String = row.get("status");
        let status = OrderStatus::parse(&status)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let serial: String = row.get("order_serial");

        Ok(Order {
            id: OrderId::new(row.get("id")),
            serial: OrderSerial::new(serial),
            user_id: UserId::new(row.get("user_id")),
            activity_id: ActivityId::new(row.get("activity_id")),
            product_id: ProductId::new(row.get("product_id")),
            amount: Money::from_cents(row.get("amount_cents")),
            price: Money::from_cents(row.get("price_cents")),
            quantity: row.get("quantity"),
            status,
            created_at: row.get("created_at"),
        })
    }
}

impl OrderRepository for PostgresOrderRepository {
    fn create(&self, order: NewOrder) -> BoxFuture<'_, Result<Order, RepositoryError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                r"
                INSERT INTO orders (
                    order_serial, user_id, activity_id, product_id,
                    amount_cents, price_cents, quantity, status, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING {ORDER_COLUMNS}
                "
            ))
            .bind(order.serial.as_str())
            .bind(order.user_id.get())
            .bind(order.activity_id.get())
            .bind(order.product_id.get())
            .bind(order.amount().cents())
            .bind(order.price.cents())
            .bind(order.quantity)
            .bind(OrderStatus::Pending.as_str())
            .bind(order.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(query_failed)?;

            let created = Self::row_to_order(&row)?;
            tracing::debug!(
                order_serial = %created.serial.as_str(),
                user_id = %created.user_id,
                activity_id = %created.activity_id,
                "Order persisted"
            );
            Ok(created)
        })
    }

    fn get_by_serial<'a>(
        &'a self,
        serial: &'a OrderSerial,
    ) -> BoxFuture<'a, Result<Option<Order>, RepositoryError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders WHERE order_serial = $1"
            ))
            .bind(serial.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed)?;

            row.as_ref().map(Self::row_to_order).transpose()
        })
    }

    fn list_by_user(
        &self,
        user: UserId,
        status: Option<OrderStatus>,
    ) -> BoxFuture<'_, Result<Vec<Order>, RepositoryError>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                r"
                SELECT {ORDER_COLUMNS} FROM orders
                WHERE user_id = $1 AND ($2::TEXT IS NULL OR status = $2)
                ORDER BY created_at DESC, id DESC
                "
            ))
            .bind(user.get())
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed)?;

            rows.iter().map(Self::row_to_order).collect()
        })
    }

    fn list_pending(&self) -> BoxFuture<'_, Result<Vec<Order>, RepositoryError>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders WHERE status = $1 ORDER BY created_at ASC, id ASC"
            ))
            .bind(OrderStatus::Pending.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed)?;

            rows.iter().map(Self::row_to_order).collect()
        })
    }

    fn transition_status<'a>(
        &'a self,
        serial: &'a OrderSerial,
        from: OrderStatus,
        to: OrderStatus,
    ) -> BoxFuture<'a, Result<bool, RepositoryError>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE orders SET status = $1, updated_at = now()
                WHERE order_serial = $2 AND status = $3
                ",
            )
            .bind(to.as_str())
            .bind(serial.as_str())
            .bind(from.as_str())
            .execute(&self.pool)
            .await
            .map_err(query_failed)?;

            let changed = result.rows_affected() == 1;
            tracing::debug!(
                order_serial = %serial.as_str(),
                from = from.as_str(),
                to = to.as_str(),
                changed,
                "Order status transition"
            );
            Ok(changed)
        })
    }
}
