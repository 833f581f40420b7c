use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{Money, Order, OrderLineItem, OrderStatus, PaymentStatus, SkuId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{OrderStore, Result, StoreError};

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        Ok(Order {
            id: OrderId::from_raw(row.try_get("id")?),
            user_id: row.try_get::<i64, _>("user_id")? as u64,
            status: parse_order_status(row.try_get("status")?)?,
            payment_status: parse_payment_status(row.try_get("payment_status")?)?,
            goods_amount: Money::from_cents(row.try_get("goods_amount_cents")?),
            freight_amount: Money::from_cents(row.try_get("freight_amount_cents")?),
            discount_amount: Money::from_cents(row.try_get("discount_amount_cents")?),
            payment_amount: Money::from_cents(row.try_get("payment_amount_cents")?),
            pay_time: row.try_get("pay_time")?,
            pay_method: row.try_get("pay_method")?,
            created_at: row.try_get("created_at")?,
            delivery_time: row.try_get("delivery_time")?,
            deleted_at: row.try_get("deleted_at")?,
            address_id: row.try_get::<i64, _>("address_id")? as u64,
            address_snapshot: row.try_get("address_snapshot")?,
        })
    }

    fn row_to_line_item(row: PgRow) -> Result<OrderLineItem> {
        Ok(OrderLineItem {
            order_id: OrderId::from_raw(row.try_get("order_id")?),
            merchant_id: row.try_get::<i64, _>("merchant_id")? as u64,
            goods_id: row.try_get::<i64, _>("goods_id")? as u64,
            sku_id: SkuId::from_raw(row.try_get::<i64, _>("sku_id")? as u64),
            goods_version: row.try_get::<i32, _>("goods_version")? as u32,
            quantity: row.try_get::<i32, _>("quantity")? as u32,
            original_price: Money::from_cents(row.try_get("original_price_cents")?),
            sale_price: Money::from_cents(row.try_get("sale_price_cents")?),
            freight: Money::from_cents(row.try_get("freight_cents")?),
            discount: Money::from_cents(row.try_get("discount_cents")?),
            coupon_id: row
                .try_get::<Option<i64>, _>("coupon_id")?
                .map(|id| id as u64),
            payment_amount: Money::from_cents(row.try_get("payment_amount_cents")?),
            single_price: Money::from_cents(row.try_get("single_price_cents")?),
        })
    }
}

fn parse_order_status(value: &str) -> Result<OrderStatus> {
    match value {
        "Unpaid" => Ok(OrderStatus::Unpaid),
        "Paid" => Ok(OrderStatus::Paid),
        "Completed" => Ok(OrderStatus::Completed),
        "Cancelled" => Ok(OrderStatus::Cancelled),
        other => Err(StoreError::InvalidStatus {
            value: other.to_string(),
        }),
    }
}

fn parse_payment_status(value: &str) -> Result<PaymentStatus> {
    match value {
        "Pending" => Ok(PaymentStatus::Pending),
        "Succeeded" => Ok(PaymentStatus::Succeeded),
        "Cancelled" => Ok(PaymentStatus::Cancelled),
        other => Err(StoreError::InvalidStatus {
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn create(&self, order: &Order, items: &[OrderLineItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, user_id, status, payment_status,
                goods_amount_cents, freight_amount_cents, discount_amount_cents, payment_amount_cents,
                pay_time, pay_method, created_at, delivery_time, deleted_at,
                address_id, address_snapshot
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(order.id.as_i64())
        .bind(order.user_id as i64)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.goods_amount.cents())
        .bind(order.freight_amount.cents())
        .bind(order.discount_amount.cents())
        .bind(order.payment_amount.cents())
        .bind(order.pay_time)
        .bind(order.pay_method.as_deref())
        .bind(order.created_at)
        .bind(order.delivery_time)
        .bind(order.deleted_at)
        .bind(order.address_id as i64)
        .bind(&order.address_snapshot)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::DuplicateOrder(order.id);
            }
            StoreError::Database(e)
        })?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO order_line_items (
                    order_id, merchant_id, goods_id, sku_id, goods_version, quantity,
                    original_price_cents, sale_price_cents, freight_cents, discount_cents,
                    coupon_id, payment_amount_cents, single_price_cents
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(item.order_id.as_i64())
            .bind(item.merchant_id as i64)
            .bind(item.goods_id as i64)
            .bind(item.sku_id.as_u64() as i64)
            .bind(item.goods_version as i32)
            .bind(item.quantity as i32)
            .bind(item.original_price.cents())
            .bind(item.sale_price.cents())
            .bind(item.freight.cents())
            .bind(item.discount.cents())
            .bind(item.coupon_id.map(|id| id as i64))
            .bind(item.payment_amount.cents())
            .bind(item.single_price.cents())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(order_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn line_items(&self, order_id: OrderId) -> Result<Vec<OrderLineItem>> {
        let rows = sqlx::query("SELECT * FROM order_line_items WHERE order_id = $1")
            .bind(order_id.as_i64())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_line_item).collect()
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        payment_status: PaymentStatus,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET status = $2, payment_status = $3 WHERE id = $1")
            .bind(order_id.as_i64())
            .bind(status.as_str())
            .bind(payment_status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }

    async fn record_payment(
        &self,
        order_id: OrderId,
        paid_at: DateTime<Utc>,
        method: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, payment_status = $3, pay_time = $4, pay_method = $5
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_i64())
        .bind(OrderStatus::Paid.as_str())
        .bind(PaymentStatus::Succeeded.as_str())
        .bind(paid_at)
        .bind(method)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }

    async fn status_and_created_at(
        &self,
        order_id: OrderId,
    ) -> Result<(OrderStatus, PaymentStatus, DateTime<Utc>)> {
        let row =
            sqlx::query("SELECT status, payment_status, created_at FROM orders WHERE id = $1")
                .bind(order_id.as_i64())
                .fetch_optional(&self.pool)
                .await?
                .ok_or(StoreError::OrderNotFound(order_id))?;

        Ok((
            parse_order_status(row.try_get("status")?)?,
            parse_payment_status(row.try_get("payment_status")?)?,
            row.try_get("created_at")?,
        ))
    }

    async fn soft_delete(&self, order_id: OrderId) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET deleted_at = $2 WHERE id = $1")
            .bind(order_id.as_i64())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }
}
