//! Persistence layer for the order-commit system.
//!
//! Two stores sit behind traits so the domain never sees a concrete backend:
//!
//! - [`Database`] / [`Transaction`]: the relational store holding variants,
//!   products, orders, order lines and the cart-cleanup outbox. Every write
//!   happens through an explicit transaction handle.
//! - [`CartStore`]: the per-user cart cache (quantities plus the selected set).
//!
//! Each trait has an in-memory implementation for tests and local runs, a
//! PostgreSQL implementation on `sqlx`, and (for the cart) a Redis one.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod query;
pub mod redis_cart;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryCartStore, InMemoryDatabase, InMemoryTransaction};
pub use model::{
    CartCleanup, Goods, NewOrder, NewOrderLine, OrderInfo, OrderLine, ReviewUpdate, Sku,
};
pub use postgres::{PgDatabase, PgTransaction};
pub use query::LineQuery;
pub use redis_cart::RedisCartStore;
pub use store::{CartStore, Database, Transaction};
