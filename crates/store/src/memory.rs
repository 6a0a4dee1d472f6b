use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{GoodsId, Money, OrderId, OrderStatus, SkuId, UserId};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::model::{
    CartCleanup, Goods, NewOrder, NewOrderLine, OrderInfo, OrderLine, ReviewUpdate, Sku,
};
use crate::store::{CartStore, Database, Transaction};
use crate::{LineQuery, Result, StoreError};

#[derive(Debug)]
struct OutboxEntry {
    cleanup: CartCleanup,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    skus: HashMap<SkuId, Sku>,
    goods: HashMap<GoodsId, Goods>,
    users: HashMap<UserId, String>,
    orders: HashMap<OrderId, OrderInfo>,
    lines: Vec<OrderLine>,
    next_line_id: i64,
    outbox: Vec<OutboxEntry>,
    /// Row locks taken by `find_order_for_update`, held until the
    /// transaction ends.
    order_locks: HashMap<OrderId, Arc<tokio::sync::Mutex<()>>>,
    /// Conditional updates to fail as if another writer got there first.
    stock_conflicts: HashMap<SkuId, u32>,
}

fn lock(state: &Mutex<InMemoryState>) -> MutexGuard<'_, InMemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn sorted_lines(state: &InMemoryState, query: &LineQuery) -> Vec<OrderLine> {
    let mut lines: Vec<OrderLine> = state
        .lines
        .iter()
        .filter(|l| query.matches(l))
        .cloned()
        .collect();
    lines.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
    if query.newest_first {
        lines.reverse();
    }
    lines
}

/// In-memory relational store for testing and local runs.
///
/// Writes are applied to the shared state as they happen and recorded in an
/// undo log; rollback replays the log backwards. Stock changes are undone as
/// deltas, so rolling back never clobbers a concurrent committed reservation.
/// Unlike PostgreSQL, other transactions can observe uncommitted rows.
#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryDatabase {
    /// Creates a new empty in-memory database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a product.
    pub fn insert_goods(&self, goods: Goods) {
        lock(&self.state).goods.insert(goods.id, goods);
    }

    /// Inserts or replaces a variant.
    pub fn insert_sku(&self, sku: Sku) {
        lock(&self.state).skus.insert(sku.id, sku);
    }

    /// Registers a user's display name.
    pub fn insert_user(&self, user_id: UserId, username: impl Into<String>) {
        lock(&self.state).users.insert(user_id, username.into());
    }

    /// Returns the current record of a variant.
    pub fn sku(&self, sku_id: SkuId) -> Option<Sku> {
        lock(&self.state).skus.get(&sku_id).cloned()
    }

    /// Returns the current record of a product.
    pub fn goods(&self, goods_id: GoodsId) -> Option<Goods> {
        lock(&self.state).goods.get(&goods_id).cloned()
    }

    /// Returns the number of stored orders.
    pub fn order_count(&self) -> usize {
        lock(&self.state).orders.len()
    }

    /// Returns the number of stored order lines.
    pub fn line_count(&self) -> usize {
        lock(&self.state).lines.len()
    }

    /// Sets an order's status directly, standing in for the payment and
    /// delivery subsystems.
    pub fn set_order_status(&self, order_id: &OrderId, status: OrderStatus) {
        if let Some(order) = lock(&self.state).orders.get_mut(order_id) {
            order.status = status;
        }
    }

    /// Makes the next `times` conditional stock updates on `sku_id` affect no
    /// rows, as if a concurrent writer had won each race.
    pub fn inject_stock_conflicts(&self, sku_id: SkuId, times: u32) {
        lock(&self.state).stock_conflicts.insert(sku_id, times);
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(InMemoryTransaction {
            state: Arc::clone(&self.state),
            undo: Vec::new(),
            staged_cleanups: Vec::new(),
            locked_orders: HashMap::new(),
            finished: false,
        })
    }

    async fn find_skus(&self, ids: &[SkuId]) -> Result<Vec<Sku>> {
        let state = lock(&self.state);
        let mut skus: Vec<Sku> = ids
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter_map(|id| state.skus.get(id).cloned())
            .collect();
        skus.sort_by_key(|s| s.id);
        Ok(skus)
    }

    async fn find_order(&self, order_id: &OrderId) -> Result<Option<OrderInfo>> {
        Ok(lock(&self.state).orders.get(order_id).cloned())
    }

    async fn find_orders(&self, order_ids: &[OrderId]) -> Result<Vec<OrderInfo>> {
        let state = lock(&self.state);
        Ok(order_ids
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter_map(|id| state.orders.get(id).cloned())
            .collect())
    }

    async fn query_lines(&self, query: LineQuery) -> Result<Vec<OrderLine>> {
        Ok(sorted_lines(&lock(&self.state), &query))
    }

    async fn orders_for_user(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<OrderInfo>> {
        let state = lock(&self.state);
        let mut orders: Vec<OrderInfo> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.order_id.cmp(&a.order_id))
        });
        Ok(orders.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_orders_for_user(&self, user_id: UserId) -> Result<u64> {
        let state = lock(&self.state);
        Ok(state.orders.values().filter(|o| o.user_id == user_id).count() as u64)
    }

    async fn usernames(&self, ids: &[UserId]) -> Result<HashMap<UserId, String>> {
        let state = lock(&self.state);
        Ok(ids
            .iter()
            .filter_map(|id| state.users.get(id).map(|name| (*id, name.clone())))
            .collect())
    }

    async fn pending_cleanups(&self, limit: usize) -> Result<Vec<CartCleanup>> {
        let state = lock(&self.state);
        Ok(state
            .outbox
            .iter()
            .filter(|e| e.completed_at.is_none())
            .take(limit)
            .map(|e| e.cleanup.clone())
            .collect())
    }

    async fn complete_cleanup(&self, id: Uuid) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(entry) = state.outbox.iter_mut().find(|e| e.cleanup.id == id) {
            entry.completed_at.get_or_insert_with(Utc::now);
        }
        Ok(())
    }

    async fn record_cleanup_failure(&self, id: Uuid) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(entry) = state.outbox.iter_mut().find(|e| e.cleanup.id == id) {
            entry.cleanup.attempts += 1;
        }
        Ok(())
    }

    async fn purge_completed_cleanups(&self, completed_before: DateTime<Utc>) -> Result<u64> {
        let mut state = lock(&self.state);
        let before = state.outbox.len();
        state
            .outbox
            .retain(|e| e.completed_at.is_none_or(|at| at > completed_before));
        Ok((before - state.outbox.len()) as u64)
    }
}

#[derive(Debug)]
enum Undo {
    Stock {
        sku_id: SkuId,
        stock_change: i64,
        sales_change: i64,
    },
    GoodsSales {
        goods_id: GoodsId,
        delta: u32,
    },
    OrderInserted(OrderId),
    LineInserted(i64),
    OrderTotals {
        order_id: OrderId,
        total_count: u32,
        total_amount: Money,
    },
    Review(Box<OrderLine>),
    SkuComments(SkuId),
    Status {
        order_id: OrderId,
        previous: OrderStatus,
    },
}

fn revert(value: u32, change: i64) -> u32 {
    u32::try_from(i64::from(value) - change).unwrap_or(0)
}

impl Undo {
    fn apply(self, state: &mut InMemoryState) {
        match self {
            Undo::Stock {
                sku_id,
                stock_change,
                sales_change,
            } => {
                if let Some(sku) = state.skus.get_mut(&sku_id) {
                    sku.stock = revert(sku.stock, stock_change);
                    sku.sales = revert(sku.sales, sales_change);
                }
            }
            Undo::GoodsSales { goods_id, delta } => {
                if let Some(goods) = state.goods.get_mut(&goods_id) {
                    goods.sales = goods.sales.saturating_sub(delta);
                }
            }
            Undo::OrderInserted(order_id) => {
                state.orders.remove(&order_id);
            }
            Undo::LineInserted(line_id) => {
                state.lines.retain(|l| l.id != line_id);
            }
            Undo::OrderTotals {
                order_id,
                total_count,
                total_amount,
            } => {
                if let Some(order) = state.orders.get_mut(&order_id) {
                    order.total_count = total_count;
                    order.total_amount = total_amount;
                }
            }
            Undo::Review(previous) => {
                if let Some(line) = state.lines.iter_mut().find(|l| l.id == previous.id) {
                    *line = *previous;
                }
            }
            Undo::SkuComments(sku_id) => {
                if let Some(sku) = state.skus.get_mut(&sku_id) {
                    sku.comments = sku.comments.saturating_sub(1);
                }
            }
            Undo::Status { order_id, previous } => {
                if let Some(order) = state.orders.get_mut(&order_id) {
                    order.status = previous;
                }
            }
        }
    }
}

/// Transaction over an [`InMemoryDatabase`].
///
/// Rolls back on drop unless committed. Order locks are released when the
/// transaction commits, rolls back or is dropped.
pub struct InMemoryTransaction {
    state: Arc<Mutex<InMemoryState>>,
    undo: Vec<Undo>,
    staged_cleanups: Vec<CartCleanup>,
    locked_orders: HashMap<OrderId, OwnedMutexGuard<()>>,
    finished: bool,
}

impl InMemoryTransaction {
    fn undo_all(&mut self) {
        let mut state = lock(&self.state);
        while let Some(op) = self.undo.pop() {
            op.apply(&mut state);
        }
        self.staged_cleanups.clear();
        self.locked_orders.clear();
        self.finished = true;
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.undo_all();
        }
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn find_sku(&mut self, sku_id: SkuId) -> Result<Option<Sku>> {
        Ok(lock(&self.state).skus.get(&sku_id).cloned())
    }

    async fn update_stock_if_unchanged(
        &mut self,
        sku_id: SkuId,
        expected_stock: u32,
        new_stock: u32,
        new_sales: u32,
    ) -> Result<u64> {
        let mut state = lock(&self.state);

        if let Some(remaining) = state.stock_conflicts.get_mut(&sku_id)
            && *remaining > 0
        {
            *remaining -= 1;
            return Ok(0);
        }

        let Some(sku) = state.skus.get_mut(&sku_id) else {
            return Ok(0);
        };
        if sku.stock != expected_stock {
            return Ok(0);
        }

        let stock_change = i64::from(new_stock) - i64::from(sku.stock);
        let sales_change = i64::from(new_sales) - i64::from(sku.sales);
        sku.stock = new_stock;
        sku.sales = new_sales;
        self.undo.push(Undo::Stock {
            sku_id,
            stock_change,
            sales_change,
        });
        Ok(1)
    }

    async fn add_goods_sales(&mut self, goods_id: GoodsId, delta: u32) -> Result<()> {
        let mut state = lock(&self.state);
        let goods = state
            .goods
            .get_mut(&goods_id)
            .ok_or_else(|| StoreError::InvalidData(format!("goods {goods_id} does not exist")))?;
        goods.sales += delta;
        self.undo.push(Undo::GoodsSales { goods_id, delta });
        Ok(())
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<()> {
        let mut state = lock(&self.state);
        if state.orders.contains_key(&order.order_id) {
            return Err(StoreError::InvalidData(format!(
                "order {} already exists",
                order.order_id
            )));
        }
        state
            .orders
            .insert(order.order_id.clone(), order.clone().into_info());
        self.undo.push(Undo::OrderInserted(order.order_id.clone()));
        Ok(())
    }

    async fn insert_line(&mut self, line: &NewOrderLine) -> Result<()> {
        let mut state = lock(&self.state);
        state.next_line_id += 1;
        let id = state.next_line_id;
        let now = Utc::now();
        state.lines.push(OrderLine {
            id,
            order_id: line.order_id.clone(),
            sku_id: line.sku_id,
            count: line.count,
            price: line.price,
            comment: String::new(),
            score: 0,
            is_anonymous: false,
            is_commented: false,
            created_at: now,
            updated_at: now,
        });
        self.undo.push(Undo::LineInserted(id));
        Ok(())
    }

    async fn update_order_totals(
        &mut self,
        order_id: &OrderId,
        total_count: u32,
        total_amount: Money,
    ) -> Result<()> {
        let mut state = lock(&self.state);
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| StoreError::InvalidData(format!("order {order_id} does not exist")))?;
        self.undo.push(Undo::OrderTotals {
            order_id: order_id.clone(),
            total_count: order.total_count,
            total_amount: order.total_amount,
        });
        order.total_count = total_count;
        order.total_amount = total_amount;
        Ok(())
    }

    async fn find_order(&mut self, order_id: &OrderId) -> Result<Option<OrderInfo>> {
        Ok(lock(&self.state).orders.get(order_id).cloned())
    }

    async fn find_order_for_update(&mut self, order_id: &OrderId) -> Result<Option<OrderInfo>> {
        if !self.locked_orders.contains_key(order_id) {
            let row_lock = Arc::clone(
                lock(&self.state)
                    .order_locks
                    .entry(order_id.clone())
                    .or_default(),
            );
            let guard = row_lock.lock_owned().await;
            self.locked_orders.insert(order_id.clone(), guard);
        }
        Ok(lock(&self.state).orders.get(order_id).cloned())
    }

    async fn query_lines(&mut self, query: LineQuery) -> Result<Vec<OrderLine>> {
        Ok(sorted_lines(&lock(&self.state), &query))
    }

    async fn update_review(&mut self, line_id: i64, review: &ReviewUpdate) -> Result<()> {
        let mut state = lock(&self.state);
        let line = state
            .lines
            .iter_mut()
            .find(|l| l.id == line_id)
            .ok_or_else(|| StoreError::InvalidData(format!("order line {line_id} does not exist")))?;
        self.undo.push(Undo::Review(Box::new(line.clone())));
        line.comment = review.comment.clone();
        line.score = review.score;
        line.is_anonymous = review.is_anonymous;
        line.is_commented = true;
        line.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_sku_comments(&mut self, sku_id: SkuId) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(sku) = state.skus.get_mut(&sku_id) {
            sku.comments += 1;
            self.undo.push(Undo::SkuComments(sku_id));
        }
        Ok(())
    }

    async fn update_order_status(
        &mut self,
        order_id: &OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<u64> {
        let mut state = lock(&self.state);
        match state.orders.get_mut(order_id) {
            Some(order) if order.status == from => {
                order.status = to;
                self.undo.push(Undo::Status {
                    order_id: order_id.clone(),
                    previous: from,
                });
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn enqueue_cart_cleanup(&mut self, cleanup: &CartCleanup) -> Result<()> {
        self.staged_cleanups.push(cleanup.clone());
        Ok(())
    }

    async fn commit(mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state
            .outbox
            .extend(self.staged_cleanups.drain(..).map(|cleanup| OutboxEntry {
                cleanup,
                completed_at: None,
            }));
        drop(state);
        self.undo.clear();
        self.locked_orders.clear();
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        self.undo_all();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryCartState {
    quantities: HashMap<UserId, HashMap<SkuId, u32>>,
    selected: HashMap<UserId, HashSet<SkuId>>,
    fail_on_remove: bool,
}

/// In-memory cart cache for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCartStore {
    state: Arc<Mutex<InMemoryCartState>>,
}

impl InMemoryCartStore {
    /// Creates a new empty cart store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryCartState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Puts `count` of a variant into the user's cart, optionally selecting it.
    pub fn add_item(&self, user_id: UserId, sku_id: SkuId, count: u32, selected: bool) {
        let mut state = self.lock();
        state
            .quantities
            .entry(user_id)
            .or_default()
            .insert(sku_id, count);
        if selected {
            state.selected.entry(user_id).or_default().insert(sku_id);
        }
    }

    /// Configures the store to fail every remove call.
    pub fn set_fail_on_remove(&self, fail: bool) {
        self.lock().fail_on_remove = fail;
    }

    /// Returns true if the variant is still in the user's cart.
    pub fn contains(&self, user_id: UserId, sku_id: SkuId) -> bool {
        self.lock()
            .quantities
            .get(&user_id)
            .is_some_and(|items| items.contains_key(&sku_id))
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn get_quantities(&self, user_id: UserId) -> Result<HashMap<SkuId, u32>> {
        Ok(self
            .lock()
            .quantities
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_selected(&self, user_id: UserId) -> Result<HashSet<SkuId>> {
        Ok(self
            .lock()
            .selected
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove(&self, user_id: UserId, sku_ids: &[SkuId]) -> Result<()> {
        let mut state = self.lock();
        if state.fail_on_remove {
            return Err(StoreError::Unavailable("cart cache is down".to_string()));
        }
        if let Some(items) = state.quantities.get_mut(&user_id) {
            for id in sku_ids {
                items.remove(id);
            }
        }
        if let Some(selected) = state.selected.get_mut(&user_id) {
            for id in sku_ids {
                selected.remove(id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::{AddressId, PayMethod};

    use super::*;

    fn seeded() -> InMemoryDatabase {
        let db = InMemoryDatabase::new();
        db.insert_goods(Goods {
            id: GoodsId::new(1),
            name: "Phone".to_string(),
            sales: 0,
        });
        db.insert_sku(Sku {
            id: SkuId::new(10),
            goods_id: GoodsId::new(1),
            name: "Phone 64GB".to_string(),
            default_image_url: String::new(),
            price: Money::from_cents(1000),
            stock: 5,
            sales: 0,
            comments: 0,
        });
        db
    }

    fn new_order(id: &str) -> NewOrder {
        NewOrder {
            order_id: OrderId::new(id),
            user_id: UserId::new(1),
            address_id: AddressId::new(1),
            freight: Money::from_cents(1000),
            pay_method: PayMethod::Prepaid,
            status: OrderStatus::Unpaid,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn conditional_update_applies_only_on_expected_stock() {
        let db = seeded();
        let mut tx = db.begin().await.unwrap();

        let stale = tx
            .update_stock_if_unchanged(SkuId::new(10), 4, 2, 2)
            .await
            .unwrap();
        assert_eq!(stale, 0);

        let fresh = tx
            .update_stock_if_unchanged(SkuId::new(10), 5, 3, 2)
            .await
            .unwrap();
        assert_eq!(fresh, 1);
        tx.commit().await.unwrap();

        let sku = db.sku(SkuId::new(10)).unwrap();
        assert_eq!((sku.stock, sku.sales), (3, 2));
    }

    #[tokio::test]
    async fn rollback_restores_every_write() {
        let db = seeded();
        let mut tx = db.begin().await.unwrap();
        tx.insert_order(&new_order("o1")).await.unwrap();
        tx.insert_line(&NewOrderLine {
            order_id: OrderId::new("o1"),
            sku_id: SkuId::new(10),
            count: 2,
            price: Money::from_cents(1000),
        })
        .await
        .unwrap();
        tx.update_stock_if_unchanged(SkuId::new(10), 5, 3, 2)
            .await
            .unwrap();
        tx.add_goods_sales(GoodsId::new(1), 2).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(db.order_count(), 0);
        assert_eq!(db.line_count(), 0);
        assert_eq!(db.sku(SkuId::new(10)).unwrap().stock, 5);
        assert_eq!(db.goods(GoodsId::new(1)).unwrap().sales, 0);
    }

    #[tokio::test]
    async fn dropping_a_transaction_rolls_it_back() {
        let db = seeded();
        {
            let mut tx = db.begin().await.unwrap();
            tx.insert_order(&new_order("o1")).await.unwrap();
        }
        assert_eq!(db.order_count(), 0);
    }

    #[tokio::test]
    async fn rollback_does_not_clobber_concurrent_reservations() {
        let db = seeded();
        let mut first = db.begin().await.unwrap();
        first
            .update_stock_if_unchanged(SkuId::new(10), 5, 3, 2)
            .await
            .unwrap();

        let mut second = db.begin().await.unwrap();
        second
            .update_stock_if_unchanged(SkuId::new(10), 3, 2, 3)
            .await
            .unwrap();
        second.commit().await.unwrap();

        first.rollback().await.unwrap();
        let sku = db.sku(SkuId::new(10)).unwrap();
        assert_eq!((sku.stock, sku.sales), (4, 1));
    }

    #[tokio::test]
    async fn injected_conflicts_are_consumed() {
        let db = seeded();
        db.inject_stock_conflicts(SkuId::new(10), 2);
        let mut tx = db.begin().await.unwrap();
        for _ in 0..2 {
            let rows = tx
                .update_stock_if_unchanged(SkuId::new(10), 5, 4, 1)
                .await
                .unwrap();
            assert_eq!(rows, 0);
        }
        let rows = tx
            .update_stock_if_unchanged(SkuId::new(10), 5, 4, 1)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn cleanups_become_visible_on_commit() {
        let db = seeded();
        let cleanup = CartCleanup::new(UserId::new(1), OrderId::new("o1"), vec![SkuId::new(10)]);

        let mut tx = db.begin().await.unwrap();
        tx.enqueue_cart_cleanup(&cleanup).await.unwrap();
        assert!(db.pending_cleanups(10).await.unwrap().is_empty());
        tx.commit().await.unwrap();

        let pending = db.pending_cleanups(10).await.unwrap();
        assert_eq!(pending, vec![cleanup.clone()]);

        db.record_cleanup_failure(cleanup.id).await.unwrap();
        assert_eq!(db.pending_cleanups(10).await.unwrap()[0].attempts, 1);

        db.complete_cleanup(cleanup.id).await.unwrap();
        assert!(db.pending_cleanups(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_drops_only_completed_cleanups() {
        let db = seeded();
        let done = CartCleanup::new(UserId::new(1), OrderId::new("o1"), vec![SkuId::new(10)]);
        let pending = CartCleanup::new(UserId::new(1), OrderId::new("o2"), vec![SkuId::new(10)]);
        let mut tx = db.begin().await.unwrap();
        tx.enqueue_cart_cleanup(&done).await.unwrap();
        tx.enqueue_cart_cleanup(&pending).await.unwrap();
        tx.commit().await.unwrap();
        db.complete_cleanup(done.id).await.unwrap();

        let an_hour_ago = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(db.purge_completed_cleanups(an_hour_ago).await.unwrap(), 0);

        assert_eq!(db.purge_completed_cleanups(Utc::now()).await.unwrap(), 1);
        assert_eq!(db.pending_cleanups(10).await.unwrap(), vec![pending]);
    }

    #[tokio::test]
    async fn order_lock_blocks_until_holder_commits() {
        let db = seeded();
        let mut setup = db.begin().await.unwrap();
        setup.insert_order(&new_order("o1")).await.unwrap();
        setup.commit().await.unwrap();

        let mut first = db.begin().await.unwrap();
        first
            .find_order_for_update(&OrderId::new("o1"))
            .await
            .unwrap();
        // Locking again from the holder does not wait on itself.
        assert!(
            first
                .find_order_for_update(&OrderId::new("o1"))
                .await
                .unwrap()
                .is_some()
        );

        let contender = db.clone();
        let second = tokio::spawn(async move {
            let mut tx = contender.begin().await.unwrap();
            tx.find_order_for_update(&OrderId::new("o1"))
                .await
                .unwrap()
                .is_some()
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        first.commit().await.unwrap();
        assert!(second.await.unwrap());
    }

    #[tokio::test]
    async fn find_orders_skips_unknown_ids() {
        let db = seeded();
        let mut tx = db.begin().await.unwrap();
        tx.insert_order(&new_order("o1")).await.unwrap();
        tx.insert_order(&new_order("o2")).await.unwrap();
        tx.commit().await.unwrap();

        let mut orders = db
            .find_orders(&[OrderId::new("o2"), OrderId::new("missing"), OrderId::new("o1")])
            .await
            .unwrap();
        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        let ids: Vec<&str> = orders.iter().map(|o| o.order_id.as_str()).collect();
        assert_eq!(ids, vec!["o1", "o2"]);
    }

    #[tokio::test]
    async fn status_update_requires_expected_state() {
        let db = seeded();
        let mut tx = db.begin().await.unwrap();
        tx.insert_order(&new_order("o1")).await.unwrap();
        let rows = tx
            .update_order_status(
                &OrderId::new("o1"),
                OrderStatus::Uncommented,
                OrderStatus::Finished,
            )
            .await
            .unwrap();
        assert_eq!(rows, 0);
        let rows = tx
            .update_order_status(&OrderId::new("o1"), OrderStatus::Unpaid, OrderStatus::Closed)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn cart_remove_clears_quantities_and_selection() {
        let cart = InMemoryCartStore::new();
        let user = UserId::new(1);
        cart.add_item(user, SkuId::new(1), 2, true);
        cart.add_item(user, SkuId::new(2), 1, false);

        cart.remove(user, &[SkuId::new(1), SkuId::new(99)])
            .await
            .unwrap();

        assert!(!cart.contains(user, SkuId::new(1)));
        assert!(cart.contains(user, SkuId::new(2)));
        assert!(cart.get_selected(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cart_remove_can_be_made_to_fail() {
        let cart = InMemoryCartStore::new();
        cart.set_fail_on_remove(true);
        let result = cart.remove(UserId::new(1), &[SkuId::new(1)]).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
