//! Order service: commit a cart selection into an order, list orders.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{AddressId, Money, OrderId, PayMethod, SkuId, UserId};
use store::{
    CartCleanup, CartStore, Database, LineQuery, NewOrder, NewOrderLine, OrderInfo, OrderLine,
    Transaction,
};
use tracing::{info, warn};

use crate::cart::selected_items;
use crate::cleanup::apply_cleanup;
use crate::error::{OrderError, Result};
use crate::policy::OrderPolicy;
use crate::reservation::StockReservation;
use crate::settlement::{self, Settlement};
use crate::transaction::finish;

use super::view::{OrderPage, OrderSummary, OrderSummaryLine};

/// Largest page size accepted by [`OrderService::list_orders`].
pub const MAX_PAGE_SIZE: usize = 100;

/// Command to turn the user's selected cart items into an order.
#[derive(Debug, Clone)]
pub struct CommitOrder {
    pub user_id: UserId,
    pub address_id: AddressId,
    pub pay_method: PayMethod,
}

/// An order assembled inside a transaction, with the cart cleanup queued
/// alongside it.
#[derive(Debug, Clone)]
pub struct CommittedOrder {
    pub order: OrderInfo,
    pub lines: Vec<NewOrderLine>,
    pub cleanup: CartCleanup,
}

/// Service for committing and listing orders.
///
/// Owns the relational store, the cart cache and the commit policy. Every
/// write happens inside one explicit transaction per call; the cart is
/// pruned only after that transaction committed.
pub struct OrderService<D: Database, C: CartStore> {
    db: D,
    cart: C,
    policy: OrderPolicy,
    reservation: StockReservation,
}

impl<D: Database, C: CartStore> OrderService<D, C> {
    /// Creates a new order service.
    pub fn new(db: D, cart: C, policy: OrderPolicy) -> Self {
        let reservation = StockReservation::new(policy.max_reservation_attempts);
        Self {
            db,
            cart,
            policy,
            reservation,
        }
    }

    /// Previews the user's selected items and the freight.
    pub async fn settlement(&self, user_id: UserId) -> Result<Settlement> {
        settlement::preview(&self.db, &self.cart, user_id, self.policy.freight).await
    }

    /// Commits the user's selected cart items as a new order.
    pub async fn commit_order(&self, cmd: CommitOrder) -> Result<OrderInfo> {
        self.commit_order_at(cmd, Utc::now()).await
    }

    /// Commits an order stamped with `now`.
    ///
    /// On any failure nothing is persisted and the cart is untouched. On
    /// success the committed variants are pruned from the cart; a failed
    /// prune is logged and left to the cleanup sweeper.
    #[tracing::instrument(skip(self, now), fields(user_id = %cmd.user_id, pay_method = %cmd.pay_method))]
    pub async fn commit_order_at(&self, cmd: CommitOrder, now: DateTime<Utc>) -> Result<OrderInfo> {
        let start = Instant::now();
        let header = self.new_order(&cmd, now);

        let result = match self.db.begin().await {
            Ok(mut tx) => {
                let assembled = self.commit_in(&mut tx, header).await;
                finish(tx, assembled).await
            }
            Err(e) => Err(e.into()),
        };

        metrics::histogram!("order_commit_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        match result {
            Ok(committed) => {
                metrics::counter!("order_commits_total", "outcome" => "committed").increment(1);
                info!(
                    order_id = %committed.order.order_id,
                    total_count = committed.order.total_count,
                    total_amount = %committed.order.total_amount,
                    "order committed"
                );
                apply_cleanup(&self.db, &self.cart, &committed.cleanup).await;
                Ok(committed.order)
            }
            Err(e) => {
                metrics::counter!("order_commits_total", "outcome" => e.kind()).increment(1);
                warn!(error = %e, kind = e.kind(), "order commit failed");
                Err(e)
            }
        }
    }

    fn new_order(&self, cmd: &CommitOrder, now: DateTime<Utc>) -> NewOrder {
        NewOrder {
            order_id: OrderId::generate(now, cmd.user_id),
            user_id: cmd.user_id,
            address_id: cmd.address_id,
            freight: self.policy.freight,
            pay_method: cmd.pay_method,
            status: self.policy.statuses.initial_status(cmd.pay_method),
            created_at: now,
        }
    }

    /// Writes the order header, reserves stock for every selected item,
    /// writes the lines and final totals, and queues the cart cleanup, all
    /// inside `tx`.
    ///
    /// The caller owns the transaction and decides whether to commit it.
    pub async fn commit_in(&self, tx: &mut D::Tx, header: NewOrder) -> Result<CommittedOrder> {
        let user_id = header.user_id;
        let order_id = header.order_id.clone();

        tx.insert_order(&header).await?;

        let items = selected_items(&self.cart, user_id).await?;
        if items.is_empty() {
            return Err(OrderError::EmptyCart);
        }

        let mut total_count: u32 = 0;
        let mut goods_total = Money::zero();
        let mut lines = Vec::with_capacity(items.len());

        for item in &items {
            let reservation = self.reservation.reserve(&mut *tx, item.sku_id, item.count).await?;

            let line = NewOrderLine {
                order_id: order_id.clone(),
                sku_id: item.sku_id,
                count: item.count,
                price: reservation.sku.price,
            };
            tx.insert_line(&line).await?;

            total_count += item.count;
            goods_total += line.price.multiply(line.count);
            lines.push(line);
        }

        let total_amount = goods_total + header.freight;
        tx.update_order_totals(&order_id, total_count, total_amount)
            .await?;

        let sku_ids: Vec<SkuId> = items.iter().map(|item| item.sku_id).collect();
        let cleanup = CartCleanup::new(user_id, order_id, sku_ids);
        tx.enqueue_cart_cleanup(&cleanup).await?;

        let mut order = header.into_info();
        order.total_count = total_count;
        order.total_amount = total_amount;

        Ok(CommittedOrder {
            order,
            lines,
            cleanup,
        })
    }

    /// Lists a user's orders newest first. `page` starts at 1.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(
        &self,
        user_id: UserId,
        page: usize,
        page_size: usize,
    ) -> Result<OrderPage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

        let count = self.db.count_orders_for_user(user_id).await?;
        let orders = self
            .db
            .orders_for_user(user_id, page_size, (page - 1) * page_size)
            .await?;

        let order_ids = orders.iter().map(|order| order.order_id.clone()).collect();
        let mut lines_by_order: HashMap<OrderId, Vec<OrderLine>> = HashMap::new();
        for line in self.db.query_lines(LineQuery::for_orders(order_ids)).await? {
            lines_by_order
                .entry(line.order_id.clone())
                .or_default()
                .push(line);
        }

        let mut sku_ids: Vec<SkuId> = lines_by_order
            .values()
            .flatten()
            .map(|line| line.sku_id)
            .collect();
        sku_ids.sort();
        sku_ids.dedup();
        let skus: HashMap<SkuId, _> = self
            .db
            .find_skus(&sku_ids)
            .await?
            .into_iter()
            .map(|sku| (sku.id, sku))
            .collect();

        let orders = orders
            .into_iter()
            .map(|order| {
                let lines = lines_by_order
                    .get(&order.order_id)
                    .into_iter()
                    .flatten()
                    .map(|line| OrderSummaryLine::new(line, skus.get(&line.sku_id)))
                    .collect();
                OrderSummary::new(order, lines)
            })
            .collect();

        Ok(OrderPage {
            count,
            page,
            page_size,
            orders,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use common::{GoodsId, OrderStatus};
    use store::{Goods, InMemoryCartStore, InMemoryDatabase, Sku};

    use super::*;

    fn setup() -> (OrderService<InMemoryDatabase, InMemoryCartStore>, InMemoryDatabase, InMemoryCartStore) {
        let db = InMemoryDatabase::new();
        let cart = InMemoryCartStore::new();
        db.insert_goods(Goods {
            id: GoodsId::new(1),
            name: "Phone".to_string(),
            sales: 0,
        });
        db.insert_sku(Sku {
            id: SkuId::new(1),
            goods_id: GoodsId::new(1),
            name: "Phone 64GB".to_string(),
            default_image_url: "img/1.png".to_string(),
            price: Money::from_cents(1000),
            stock: 5,
            sales: 0,
            comments: 0,
        });
        let service = OrderService::new(db.clone(), cart.clone(), OrderPolicy::default());
        (service, db, cart)
    }

    fn commit_cmd(pay_method: PayMethod) -> CommitOrder {
        CommitOrder {
            user_id: UserId::new(7),
            address_id: AddressId::new(1),
            pay_method,
        }
    }

    #[tokio::test]
    async fn initial_status_follows_payment_method() {
        let (service, _db, cart) = setup();
        let user = UserId::new(7);

        cart.add_item(user, SkuId::new(1), 1, true);
        let prepaid = service
            .commit_order(commit_cmd(PayMethod::Prepaid))
            .await
            .unwrap();
        assert_eq!(prepaid.status, OrderStatus::Unpaid);

        cart.add_item(user, SkuId::new(1), 1, true);
        let later = Utc::now() + chrono::Duration::seconds(5);
        let cod = service
            .commit_order_at(commit_cmd(PayMethod::CashOnDelivery), later)
            .await
            .unwrap();
        assert_eq!(cod.status, OrderStatus::Unsent);
    }

    #[tokio::test]
    async fn order_id_is_stamped_with_commit_time_and_user() {
        let (service, _db, cart) = setup();
        cart.add_item(UserId::new(7), SkuId::new(1), 1, true);
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 8, 5, 1).unwrap();

        let order = service
            .commit_order_at(commit_cmd(PayMethod::Prepaid), now)
            .await
            .unwrap();

        assert_eq!(order.order_id.as_str(), "20240309080501000000007");
        assert_eq!(order.created_at, now);
    }

    #[tokio::test]
    async fn commit_in_leaves_the_transaction_to_the_caller() {
        let (service, db, cart) = setup();
        cart.add_item(UserId::new(7), SkuId::new(1), 2, true);
        let header = service.new_order(&commit_cmd(PayMethod::Prepaid), Utc::now());

        let mut tx = db.begin().await.unwrap();
        let committed = service.commit_in(&mut tx, header).await.unwrap();
        assert_eq!(committed.lines.len(), 1);
        assert_eq!(committed.order.total_amount, Money::from_cents(3000));
        tx.rollback().await.unwrap();

        assert_eq!(db.order_count(), 0);
        assert_eq!(db.sku(SkuId::new(1)).unwrap().stock, 5);
        assert!(cart.contains(UserId::new(7), SkuId::new(1)));
    }

    #[tokio::test]
    async fn list_orders_pages_newest_first() {
        let (service, _db, cart) = setup();
        let user = UserId::new(7);
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        for i in 0..3 {
            cart.add_item(user, SkuId::new(1), 1, true);
            service
                .commit_order_at(
                    commit_cmd(PayMethod::Prepaid),
                    base + chrono::Duration::minutes(i),
                )
                .await
                .unwrap();
        }

        let first = service.list_orders(user, 1, 2).await.unwrap();
        assert_eq!(first.count, 3);
        assert_eq!(first.orders.len(), 2);
        assert!(first.orders[0].created_at > first.orders[1].created_at);
        assert_eq!(first.orders[0].lines[0].name, "Phone 64GB");
        assert_eq!(first.orders[0].lines[0].amount, Money::from_cents(1000));

        let second = service.list_orders(user, 2, 2).await.unwrap();
        assert_eq!(second.orders.len(), 1);
        assert_eq!(second.orders[0].created_at, base);
    }

    #[tokio::test]
    async fn list_orders_attaches_each_order_its_own_lines() {
        let (service, _db, cart) = setup();
        let user = UserId::new(7);
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        cart.add_item(user, SkuId::new(1), 1, true);
        let older = service
            .commit_order_at(commit_cmd(PayMethod::Prepaid), base)
            .await
            .unwrap();
        cart.add_item(user, SkuId::new(1), 3, true);
        let newer = service
            .commit_order_at(
                commit_cmd(PayMethod::Prepaid),
                base + chrono::Duration::minutes(1),
            )
            .await
            .unwrap();

        let page = service.list_orders(user, 1, 10).await.unwrap();
        assert_eq!(page.orders.len(), 2);
        assert_eq!(page.orders[0].order_id, newer.order_id);
        assert_eq!(page.orders[0].lines.len(), 1);
        assert_eq!(page.orders[0].lines[0].count, 3);
        assert_eq!(page.orders[1].order_id, older.order_id);
        assert_eq!(page.orders[1].lines.len(), 1);
        assert_eq!(page.orders[1].lines[0].count, 1);
    }
}
