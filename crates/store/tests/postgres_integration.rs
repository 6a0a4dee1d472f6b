//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and truncate tables per test.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{AddressId, GoodsId, Money, OrderId, OrderStatus, PayMethod, SkuId, UserId};
use serial_test::serial;
use sqlx::PgPool;
use store::{
    CartCleanup, Database, LineQuery, NewOrder, NewOrderLine, PgDatabase, ReviewUpdate,
    Transaction,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_order_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Fresh store over cleared tables, seeded with one product, two variants and
/// one user.
async fn get_test_db() -> PgDatabase {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE cart_cleanup_outbox, order_lines, orders, skus, goods, users CASCADE",
    )
    .execute(&pool)
    .await
    .unwrap();

    sqlx::raw_sql(
        r#"
        INSERT INTO users (id, username) VALUES (1, 'alice');
        INSERT INTO goods (id, name, sales) VALUES (1, 'Phone', 0);
        INSERT INTO skus (id, goods_id, name, default_image_url, price_cents, stock, sales, comments)
        VALUES (1, 1, 'Phone 64GB', 'img/1.png', 1000, 5, 0, 0),
               (2, 1, 'Phone 128GB', 'img/2.png', 2000, 1, 0, 0);
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    PgDatabase::new(pool)
}

fn new_order(id: &str) -> NewOrder {
    NewOrder {
        order_id: OrderId::new(id),
        user_id: UserId::new(1),
        address_id: AddressId::new(3),
        freight: Money::from_cents(1000),
        pay_method: PayMethod::Prepaid,
        status: OrderStatus::Unpaid,
        created_at: Utc::now(),
    }
}

#[tokio::test]
#[serial]
async fn find_skus_skips_missing_ids() {
    let db = get_test_db().await;

    let skus = db
        .find_skus(&[SkuId::new(2), SkuId::new(99), SkuId::new(1)])
        .await
        .unwrap();

    assert_eq!(skus.len(), 2);
    assert_eq!(skus[0].id, SkuId::new(1));
    assert_eq!(skus[0].price, Money::from_cents(1000));
    assert_eq!(skus[1].stock, 1);
}

#[tokio::test]
#[serial]
async fn conditional_update_only_applies_to_expected_stock() {
    let db = get_test_db().await;
    let mut tx = db.begin().await.unwrap();

    let stale = tx
        .update_stock_if_unchanged(SkuId::new(1), 4, 2, 2)
        .await
        .unwrap();
    assert_eq!(stale, 0);

    let applied = tx
        .update_stock_if_unchanged(SkuId::new(1), 5, 3, 2)
        .await
        .unwrap();
    assert_eq!(applied, 1);
    tx.add_goods_sales(GoodsId::new(1), 2).await.unwrap();
    tx.commit().await.unwrap();

    let sku = &db.find_skus(&[SkuId::new(1)]).await.unwrap()[0];
    assert_eq!(sku.stock, 3);
    assert_eq!(sku.sales, 2);
}

#[tokio::test]
#[serial]
async fn rollback_discards_order_and_stock() {
    let db = get_test_db().await;
    let mut tx = db.begin().await.unwrap();

    tx.insert_order(&new_order("o-rollback")).await.unwrap();
    tx.update_stock_if_unchanged(SkuId::new(1), 5, 0, 5)
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert!(
        db.find_order(&OrderId::new("o-rollback"))
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(db.find_skus(&[SkuId::new(1)]).await.unwrap()[0].stock, 5);
}

#[tokio::test]
#[serial]
async fn dropped_transaction_rolls_back() {
    let db = get_test_db().await;
    {
        let mut tx = db.begin().await.unwrap();
        tx.insert_order(&new_order("o-dropped")).await.unwrap();
    }

    assert!(
        db.find_order(&OrderId::new("o-dropped"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
#[serial]
async fn order_lines_and_reviews_round_trip() {
    let db = get_test_db().await;
    let order_id = OrderId::new("o-review");

    let mut tx = db.begin().await.unwrap();
    tx.insert_order(&new_order(order_id.as_str())).await.unwrap();
    tx.insert_line(&NewOrderLine {
        order_id: order_id.clone(),
        sku_id: SkuId::new(1),
        count: 2,
        price: Money::from_cents(1000),
    })
    .await
    .unwrap();
    tx.update_order_totals(&order_id, 2, Money::from_cents(3000))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let order = db.find_order(&order_id).await.unwrap().unwrap();
    assert_eq!(order.total_count, 2);
    assert_eq!(order.total_amount, Money::from_cents(3000));
    assert_eq!(order.pay_method, PayMethod::Prepaid);

    let pending = db
        .query_lines(LineQuery::for_order(order_id.clone()).commented(false))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    let mut tx = db.begin().await.unwrap();
    tx.update_review(
        pending[0].id,
        &ReviewUpdate {
            comment: "great".to_string(),
            score: 5,
            is_anonymous: true,
        },
    )
    .await
    .unwrap();
    tx.increment_sku_comments(SkuId::new(1)).await.unwrap();
    let moved = tx
        .update_order_status(&order_id, OrderStatus::Unpaid, OrderStatus::Finished)
        .await
        .unwrap();
    assert_eq!(moved, 1);
    tx.commit().await.unwrap();

    let reviewed = db
        .query_lines(LineQuery::for_sku(SkuId::new(1)).commented(true))
        .await
        .unwrap();
    assert_eq!(reviewed.len(), 1);
    assert_eq!(reviewed[0].score, 5);
    assert!(reviewed[0].is_anonymous);
    assert_eq!(db.find_skus(&[SkuId::new(1)]).await.unwrap()[0].comments, 1);
    assert_eq!(
        db.find_order(&order_id).await.unwrap().unwrap().status,
        OrderStatus::Finished
    );
}

#[tokio::test]
#[serial]
async fn orders_for_user_are_newest_first() {
    let db = get_test_db().await;

    let mut tx = db.begin().await.unwrap();
    let mut older = new_order("o-older");
    older.created_at = Utc::now() - chrono::Duration::hours(1);
    tx.insert_order(&older).await.unwrap();
    tx.insert_order(&new_order("o-newer")).await.unwrap();
    tx.commit().await.unwrap();

    let orders = db.orders_for_user(UserId::new(1), 10, 0).await.unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].order_id.as_str(), "o-newer");
    assert_eq!(db.count_orders_for_user(UserId::new(1)).await.unwrap(), 2);
    assert_eq!(db.count_orders_for_user(UserId::new(2)).await.unwrap(), 0);

    let names = db.usernames(&[UserId::new(1), UserId::new(2)]).await.unwrap();
    assert_eq!(names.get(&UserId::new(1)).map(String::as_str), Some("alice"));
    assert!(!names.contains_key(&UserId::new(2)));
}

#[tokio::test]
#[serial]
async fn cleanup_outbox_lifecycle() {
    let db = get_test_db().await;
    let cleanup = CartCleanup::new(
        UserId::new(1),
        OrderId::new("o-cleanup"),
        vec![SkuId::new(1), SkuId::new(2)],
    );

    let mut tx = db.begin().await.unwrap();
    tx.enqueue_cart_cleanup(&cleanup).await.unwrap();
    tx.commit().await.unwrap();

    let pending = db.pending_cleanups(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].sku_ids, vec![SkuId::new(1), SkuId::new(2)]);

    db.record_cleanup_failure(cleanup.id).await.unwrap();
    assert_eq!(db.pending_cleanups(10).await.unwrap()[0].attempts, 1);

    db.complete_cleanup(cleanup.id).await.unwrap();
    assert!(db.pending_cleanups(10).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn order_row_lock_orders_concurrent_reviews() {
    let db = get_test_db().await;
    let order_id = OrderId::new("o-locked");

    let mut tx = db.begin().await.unwrap();
    tx.insert_order(&new_order(order_id.as_str())).await.unwrap();
    for sku in [1, 2] {
        tx.insert_line(&NewOrderLine {
            order_id: order_id.clone(),
            sku_id: SkuId::new(sku),
            count: 1,
            price: Money::from_cents(1000),
        })
        .await
        .unwrap();
    }
    tx.commit().await.unwrap();

    let lines = db
        .query_lines(LineQuery::for_order(order_id.clone()))
        .await
        .unwrap();
    let review = ReviewUpdate {
        comment: "fine".to_string(),
        score: 4,
        is_anonymous: false,
    };

    let mut first = db.begin().await.unwrap();
    assert!(first.find_order_for_update(&order_id).await.unwrap().is_some());
    first.update_review(lines[0].id, &review).await.unwrap();

    let second = tokio::spawn({
        let db = db.clone();
        let order_id = order_id.clone();
        let line_id = lines[1].id;
        let review = review.clone();
        async move {
            let mut tx = db.begin().await.unwrap();
            tx.find_order_for_update(&order_id).await.unwrap();
            tx.update_review(line_id, &review).await.unwrap();
            let unreviewed = tx
                .query_lines(LineQuery::for_order(order_id).commented(false))
                .await
                .unwrap()
                .len();
            tx.commit().await.unwrap();
            unreviewed
        }
    });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(!second.is_finished());

    first.commit().await.unwrap();
    assert_eq!(second.await.unwrap(), 0);
}
