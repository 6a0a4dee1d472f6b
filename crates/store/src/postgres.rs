use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AddressId, GoodsId, Money, OrderId, OrderStatus, SkuId, UserId};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use crate::model::{CartCleanup, NewOrder, NewOrderLine, OrderInfo, OrderLine, ReviewUpdate, Sku};
use crate::store::{Database, Transaction};
use crate::{LineQuery, Result, StoreError};

const SKU_COLUMNS: &str =
    "id, goods_id, name, default_image_url, price_cents, stock, sales, comments";

const ORDER_COLUMNS: &str = "order_id, user_id, address_id, total_count, total_amount_cents, \
     freight_cents, pay_method, status, created_at";

const LINE_COLUMNS: &str = "id, order_id, sku_id, count, price_cents, comment, score, \
     is_anonymous, is_commented, created_at, updated_at";

fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::InvalidData(format!("{field} = {value}")))
}

fn row_to_sku(row: PgRow) -> Result<Sku> {
    Ok(Sku {
        id: SkuId::new(row.try_get("id")?),
        goods_id: GoodsId::new(row.try_get("goods_id")?),
        name: row.try_get("name")?,
        default_image_url: row.try_get("default_image_url")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        stock: to_u32(row.try_get("stock")?, "stock")?,
        sales: to_u32(row.try_get("sales")?, "sales")?,
        comments: to_u32(row.try_get("comments")?, "comments")?,
    })
}

fn row_to_order(row: PgRow) -> Result<OrderInfo> {
    let pay_method: String = row.try_get("pay_method")?;
    let status: String = row.try_get("status")?;

    Ok(OrderInfo {
        order_id: OrderId::new(row.try_get::<String, _>("order_id")?),
        user_id: UserId::new(row.try_get("user_id")?),
        address_id: AddressId::new(row.try_get("address_id")?),
        total_count: to_u32(row.try_get("total_count")?, "total_count")?,
        total_amount: Money::from_cents(row.try_get("total_amount_cents")?),
        freight: Money::from_cents(row.try_get("freight_cents")?),
        pay_method: pay_method.parse()?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_line(row: PgRow) -> Result<OrderLine> {
    let score: i16 = row.try_get("score")?;

    Ok(OrderLine {
        id: row.try_get("id")?,
        order_id: OrderId::new(row.try_get::<String, _>("order_id")?),
        sku_id: SkuId::new(row.try_get("sku_id")?),
        count: to_u32(row.try_get("count")?, "count")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        comment: row.try_get("comment")?,
        score: u8::try_from(score)
            .map_err(|_| StoreError::InvalidData(format!("score = {score}")))?,
        is_anonymous: row.try_get("is_anonymous")?,
        is_commented: row.try_get("is_commented")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_cleanup(row: PgRow) -> Result<CartCleanup> {
    let sku_ids: Vec<i64> = row.try_get("sku_ids")?;
    let attempts: i32 = row.try_get("attempts")?;

    Ok(CartCleanup {
        id: row.try_get("id")?,
        user_id: UserId::new(row.try_get("user_id")?),
        order_id: OrderId::new(row.try_get::<String, _>("order_id")?),
        sku_ids: sku_ids.into_iter().map(SkuId::new).collect(),
        attempts: to_u32(i64::from(attempts), "attempts")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Builds the SQL for a line query; placeholders follow the bind order of
/// [`bind_line_query`].
fn line_query_sql(query: &LineQuery) -> String {
    let mut sql = format!("SELECT {LINE_COLUMNS} FROM order_lines WHERE 1=1");
    let mut param_count = 0;

    if query.order_ids.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND order_id = ANY(${param_count})"));
    }
    if query.sku_id.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND sku_id = ${param_count}"));
    }
    if query.is_commented.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND is_commented = ${param_count}"));
    }

    if query.newest_first {
        sql.push_str(" ORDER BY updated_at DESC, id DESC");
    } else {
        sql.push_str(" ORDER BY updated_at ASC, id ASC");
    }

    sql
}

fn bind_line_query<'q>(sql: &'q str, query: &'q LineQuery) -> Query<'q, Postgres, PgArguments> {
    let mut sqlx_query = sqlx::query(sql);

    if let Some(ref order_ids) = query.order_ids {
        let ids: Vec<&str> = order_ids.iter().map(OrderId::as_str).collect();
        sqlx_query = sqlx_query.bind(ids);
    }
    if let Some(sku_id) = query.sku_id {
        sqlx_query = sqlx_query.bind(sku_id.as_i64());
    }
    if let Some(is_commented) = query.is_commented {
        sqlx_query = sqlx_query.bind(is_commented);
    }

    sqlx_query
}

/// PostgreSQL-backed relational store.
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Creates a new store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool of at most `max_connections` to `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl Database for PgDatabase {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(PgTransaction {
            tx: self.pool.begin().await?,
        })
    }

    async fn find_skus(&self, ids: &[SkuId]) -> Result<Vec<Sku>> {
        let ids: Vec<i64> = ids.iter().map(SkuId::as_i64).collect();
        let rows = sqlx::query(&format!(
            "SELECT {SKU_COLUMNS} FROM skus WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_sku).collect()
    }

    async fn find_order(&self, order_id: &OrderId) -> Result<Option<OrderInfo>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"
        ))
        .bind(order_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_order).transpose()
    }

    async fn find_orders(&self, order_ids: &[OrderId]) -> Result<Vec<OrderInfo>> {
        let ids: Vec<&str> = order_ids.iter().map(OrderId::as_str).collect();
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_order).collect()
    }

    async fn query_lines(&self, query: LineQuery) -> Result<Vec<OrderLine>> {
        let sql = line_query_sql(&query);
        let rows = bind_line_query(&sql, &query)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_line).collect()
    }

    async fn orders_for_user(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<OrderInfo>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 \
             ORDER BY created_at DESC, order_id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id.as_i64())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_order).collect()
    }

    async fn count_orders_for_user(&self, user_id: UserId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE user_id = $1")
            .bind(user_id.as_i64())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn usernames(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>> {
        let ids: Vec<i64> = ids.iter().map(UserId::as_i64).collect();
        let rows = sqlx::query("SELECT id, username FROM users WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| Ok((UserId::new(row.try_get("id")?), row.try_get("username")?)))
            .collect()
    }

    async fn pending_cleanups(&self, limit: usize) -> Result<Vec<CartCleanup>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, order_id, sku_ids, attempts, created_at
            FROM cart_cleanup_outbox
            WHERE completed_at IS NULL
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_cleanup).collect()
    }

    async fn complete_cleanup(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE cart_cleanup_outbox SET completed_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_cleanup_failure(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE cart_cleanup_outbox SET attempts = attempts + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_completed_cleanups(&self, completed_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM cart_cleanup_outbox WHERE completed_at IS NOT NULL AND completed_at <= $1",
        )
        .bind(completed_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Transaction over a [`PgDatabase`]; rolled back by `sqlx` if dropped.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn find_sku(&mut self, sku_id: SkuId) -> Result<Option<Sku>> {
        let row = sqlx::query(&format!("SELECT {SKU_COLUMNS} FROM skus WHERE id = $1"))
            .bind(sku_id.as_i64())
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(row_to_sku).transpose()
    }

    async fn update_stock_if_unchanged(
        &mut self,
        sku_id: SkuId,
        expected_stock: u32,
        new_stock: u32,
        new_sales: u32,
    ) -> Result<u64> {
        let result =
            sqlx::query("UPDATE skus SET stock = $1, sales = $2 WHERE id = $3 AND stock = $4")
                .bind(i64::from(new_stock))
                .bind(i64::from(new_sales))
                .bind(sku_id.as_i64())
                .bind(i64::from(expected_stock))
                .execute(&mut *self.tx)
                .await?;

        Ok(result.rows_affected())
    }

    async fn add_goods_sales(&mut self, goods_id: GoodsId, delta: u32) -> Result<()> {
        let result = sqlx::query("UPDATE goods SET sales = sales + $1 WHERE id = $2")
            .bind(i64::from(delta))
            .bind(goods_id.as_i64())
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidData(format!(
                "goods {goods_id} does not exist"
            )));
        }
        Ok(())
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (order_id, user_id, address_id, total_count, total_amount_cents,
                                freight_cents, pay_method, status, created_at)
            VALUES ($1, $2, $3, 0, 0, $4, $5, $6, $7)
            "#,
        )
        .bind(order.order_id.as_str())
        .bind(order.user_id.as_i64())
        .bind(order.address_id.as_i64())
        .bind(order.freight.cents())
        .bind(order.pay_method.as_str())
        .bind(order.status.as_str())
        .bind(order.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_line(&mut self, line: &NewOrderLine) -> Result<()> {
        sqlx::query(
            "INSERT INTO order_lines (order_id, sku_id, count, price_cents) VALUES ($1, $2, $3, $4)",
        )
        .bind(line.order_id.as_str())
        .bind(line.sku_id.as_i64())
        .bind(i64::from(line.count))
        .bind(line.price.cents())
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_order_totals(
        &mut self,
        order_id: &OrderId,
        total_count: u32,
        total_amount: Money,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE orders SET total_count = $1, total_amount_cents = $2 WHERE order_id = $3",
        )
        .bind(i64::from(total_count))
        .bind(total_amount.cents())
        .bind(order_id.as_str())
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn find_order(&mut self, order_id: &OrderId) -> Result<Option<OrderInfo>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"
        ))
        .bind(order_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_order).transpose()
    }

    async fn find_order_for_update(&mut self, order_id: &OrderId) -> Result<Option<OrderInfo>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1 FOR UPDATE"
        ))
        .bind(order_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_order).transpose()
    }

    async fn query_lines(&mut self, query: LineQuery) -> Result<Vec<OrderLine>> {
        let sql = line_query_sql(&query);
        let rows = bind_line_query(&sql, &query)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(row_to_line).collect()
    }

    async fn update_review(&mut self, line_id: i64, review: &ReviewUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE order_lines
            SET comment = $1, score = $2, is_anonymous = $3, is_commented = TRUE, updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(&review.comment)
        .bind(i16::from(review.score))
        .bind(review.is_anonymous)
        .bind(line_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn increment_sku_comments(&mut self, sku_id: SkuId) -> Result<()> {
        sqlx::query("UPDATE skus SET comments = comments + 1 WHERE id = $1")
            .bind(sku_id.as_i64())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_order_status(
        &mut self,
        order_id: &OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<u64> {
        let result =
            sqlx::query("UPDATE orders SET status = $1 WHERE order_id = $2 AND status = $3")
                .bind(to.as_str())
                .bind(order_id.as_str())
                .bind(from.as_str())
                .execute(&mut *self.tx)
                .await?;

        Ok(result.rows_affected())
    }

    async fn enqueue_cart_cleanup(&mut self, cleanup: &CartCleanup) -> Result<()> {
        let sku_ids: Vec<i64> = cleanup.sku_ids.iter().map(SkuId::as_i64).collect();
        sqlx::query(
            r#"
            INSERT INTO cart_cleanup_outbox (id, user_id, order_id, sku_ids, attempts, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(cleanup.id)
        .bind(cleanup.user_id.as_i64())
        .bind(cleanup.order_id.as_str())
        .bind(sku_ids)
        .bind(cleanup.attempts as i32)
        .bind(cleanup.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
