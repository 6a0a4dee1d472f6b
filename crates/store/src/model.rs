//! Persistent records.

use chrono::{DateTime, Utc};
use common::{AddressId, GoodsId, Money, OrderId, OrderStatus, PayMethod, SkuId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A product variant (SKU): the unit of stock tracking.
///
/// The current stock value doubles as the row's version for the
/// conditional update that reserves stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sku {
    pub id: SkuId,
    pub goods_id: GoodsId,
    pub name: String,
    pub default_image_url: String,
    pub price: Money,
    pub stock: u32,
    pub sales: u32,
    /// Number of reviews left for this variant.
    pub comments: u32,
}

/// Parent product grouping variants; carries the aggregate sales counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goods {
    pub id: GoodsId,
    pub name: String,
    pub sales: u32,
}

/// An order header as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderInfo {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub address_id: AddressId,
    pub total_count: u32,
    /// Sum of line amounts plus freight.
    pub total_amount: Money,
    pub freight: Money,
    pub pay_method: PayMethod,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Header written at the start of a commit, before any line exists.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub address_id: AddressId,
    pub freight: Money,
    pub pay_method: PayMethod,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    /// The stored header right after insertion: zero totals.
    pub fn into_info(self) -> OrderInfo {
        OrderInfo {
            order_id: self.order_id,
            user_id: self.user_id,
            address_id: self.address_id,
            total_count: 0,
            total_amount: Money::zero(),
            freight: self.freight,
            pay_method: self.pay_method,
            status: self.status,
            created_at: self.created_at,
        }
    }
}

/// One purchased variant within an order, plus its review fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: i64,
    pub order_id: OrderId,
    pub sku_id: SkuId,
    pub count: u32,
    /// Unit price at the time of purchase.
    pub price: Money,
    pub comment: String,
    pub score: u8,
    pub is_anonymous: bool,
    pub is_commented: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderLine {
    /// Line amount: snapshot price times quantity.
    pub fn amount(&self) -> Money {
        self.price.multiply(self.count)
    }
}

#[derive(Debug, Clone)]
pub struct NewOrderLine {
    pub order_id: OrderId,
    pub sku_id: SkuId,
    pub count: u32,
    pub price: Money,
}

/// Review fields written onto an order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewUpdate {
    pub comment: String,
    pub score: u8,
    pub is_anonymous: bool,
}

/// Outbox record asking for committed variants to be pruned from a cart.
///
/// Written in the same transaction as the order it belongs to, so a
/// committed order always has a matching cleanup request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartCleanup {
    pub id: Uuid,
    pub user_id: UserId,
    pub order_id: OrderId,
    pub sku_ids: Vec<SkuId>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl CartCleanup {
    /// Creates a pending cleanup for the variants of a freshly committed order.
    pub fn new(user_id: UserId, order_id: OrderId, sku_ids: Vec<SkuId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            order_id,
            sku_ids,
            attempts: 0,
            created_at: Utc::now(),
        }
    }
}
