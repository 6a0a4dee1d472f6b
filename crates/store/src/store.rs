use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{GoodsId, Money, OrderId, OrderStatus, SkuId, UserId};
use uuid::Uuid;

use crate::model::{CartCleanup, NewOrder, NewOrderLine, OrderInfo, OrderLine, ReviewUpdate, Sku};
use crate::{LineQuery, Result};

/// Handle to the relational store.
///
/// Reads that need no isolation go straight through the handle; every write
/// goes through a [`Transaction`] obtained from [`Database::begin`].
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Database: Send + Sync + 'static {
    /// The transaction type handed out by [`Database::begin`].
    type Tx: Transaction;

    /// Opens a new atomic transaction.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Fetches the current records for the given variants.
    ///
    /// Ids that do not exist are skipped; the result is ordered by id.
    async fn find_skus(&self, ids: &[SkuId]) -> Result<Vec<Sku>>;

    /// Loads one order header.
    async fn find_order(&self, order_id: &OrderId) -> Result<Option<OrderInfo>>;

    /// Loads several order headers; ids that do not exist are skipped.
    async fn find_orders(&self, order_ids: &[OrderId]) -> Result<Vec<OrderInfo>>;

    /// Retrieves order lines matching a query.
    async fn query_lines(&self, query: LineQuery) -> Result<Vec<OrderLine>>;

    /// Lists a user's orders, newest first.
    async fn orders_for_user(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<OrderInfo>>;

    /// Counts a user's orders.
    async fn count_orders_for_user(&self, user_id: UserId) -> Result<u64>;

    /// Resolves display names for the given users; unknown ids are skipped.
    async fn usernames(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>>;

    /// Returns up to `limit` cart cleanups not yet completed, oldest first.
    async fn pending_cleanups(&self, limit: usize) -> Result<Vec<CartCleanup>>;

    /// Marks a cart cleanup as done.
    async fn complete_cleanup(&self, id: Uuid) -> Result<()>;

    /// Records a failed cleanup attempt so operators can see stuck entries.
    async fn record_cleanup_failure(&self, id: Uuid) -> Result<()>;

    /// Deletes cleanups completed at or before `completed_before`; returns
    /// how many were removed. Pending cleanups are never deleted.
    async fn purge_completed_cleanups(&self, completed_before: DateTime<Utc>) -> Result<u64>;
}

/// An open atomic transaction against the relational store.
///
/// Dropping a transaction without calling [`Transaction::commit`] discards
/// its writes.
#[async_trait]
pub trait Transaction: Send {
    /// Reads a variant's current record without taking a row lock.
    async fn find_sku(&mut self, sku_id: SkuId) -> Result<Option<Sku>>;

    /// Sets stock and sales only if the stored stock still equals
    /// `expected_stock`.
    ///
    /// Returns the number of rows affected: 1 on success, 0 if a concurrent
    /// writer changed the stock since it was read (or the variant is gone).
    async fn update_stock_if_unchanged(
        &mut self,
        sku_id: SkuId,
        expected_stock: u32,
        new_stock: u32,
        new_sales: u32,
    ) -> Result<u64>;

    /// Adds `delta` to a product's aggregate sales counter.
    async fn add_goods_sales(&mut self, goods_id: GoodsId, delta: u32) -> Result<()>;

    /// Inserts an order header with zero totals.
    async fn insert_order(&mut self, order: &NewOrder) -> Result<()>;

    /// Inserts an order line.
    async fn insert_line(&mut self, line: &NewOrderLine) -> Result<()>;

    /// Writes the final totals of an order.
    async fn update_order_totals(
        &mut self,
        order_id: &OrderId,
        total_count: u32,
        total_amount: Money,
    ) -> Result<()>;

    /// Loads one order header within the transaction.
    async fn find_order(&mut self, order_id: &OrderId) -> Result<Option<OrderInfo>>;

    /// Loads one order header and locks it until the transaction ends.
    ///
    /// A second transaction locking the same order waits here, so work that
    /// depends on the order's other lines sees them committed.
    async fn find_order_for_update(&mut self, order_id: &OrderId) -> Result<Option<OrderInfo>>;

    /// Retrieves order lines matching a query within the transaction.
    async fn query_lines(&mut self, query: LineQuery) -> Result<Vec<OrderLine>>;

    /// Writes review fields onto a line and marks it reviewed.
    async fn update_review(&mut self, line_id: i64, review: &ReviewUpdate) -> Result<()>;

    /// Increments a variant's review counter.
    async fn increment_sku_comments(&mut self, sku_id: SkuId) -> Result<()>;

    /// Moves an order from `from` to `to`; returns rows affected (0 if the
    /// order was not in `from`).
    async fn update_order_status(
        &mut self,
        order_id: &OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<u64>;

    /// Queues a cart cleanup to become visible when this transaction commits.
    async fn enqueue_cart_cleanup(&mut self, cleanup: &CartCleanup) -> Result<()>;

    /// Makes every write of this transaction durable.
    async fn commit(self) -> Result<()>;

    /// Discards every write of this transaction.
    async fn rollback(self) -> Result<()>;
}

/// Per-user cart cache.
///
/// Holds a variant → quantity mapping and the set of variants selected for
/// checkout. Not transactional; removal is idempotent.
#[async_trait]
pub trait CartStore: Send + Sync + 'static {
    /// Returns the quantity of every variant in the user's cart.
    async fn get_quantities(&self, user_id: UserId) -> Result<HashMap<SkuId, u32>>;

    /// Returns the variants the user selected for checkout.
    async fn get_selected(&self, user_id: UserId) -> Result<HashSet<SkuId>>;

    /// Removes the given variants from both the quantities and the selected
    /// set. Removing absent variants is not an error.
    async fn remove(&self, user_id: UserId, sku_ids: &[SkuId]) -> Result<()>;
}
