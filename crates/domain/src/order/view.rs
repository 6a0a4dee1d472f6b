//! Read-side projections of orders.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, OrderStatus, PayMethod, SkuId};
use serde::Serialize;
use store::{OrderInfo, OrderLine, Sku};

/// One line of an order as listed to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSummaryLine {
    pub sku_id: SkuId,
    pub name: String,
    pub default_image_url: String,
    pub count: u32,
    /// Unit price paid.
    pub price: Money,
    pub amount: Money,
}

impl OrderSummaryLine {
    pub(crate) fn new(line: &OrderLine, sku: Option<&Sku>) -> Self {
        Self {
            sku_id: line.sku_id,
            name: sku.map(|s| s.name.clone()).unwrap_or_default(),
            default_image_url: sku.map(|s| s.default_image_url.clone()).unwrap_or_default(),
            count: line.count,
            price: line.price,
            amount: line.amount(),
        }
    }
}

/// An order with its lines, as listed to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub created_at: DateTime<Utc>,
    pub total_count: u32,
    pub total_amount: Money,
    pub freight: Money,
    pub pay_method: PayMethod,
    pub status: OrderStatus,
    pub lines: Vec<OrderSummaryLine>,
}

impl OrderSummary {
    pub(crate) fn new(order: OrderInfo, lines: Vec<OrderSummaryLine>) -> Self {
        Self {
            order_id: order.order_id,
            created_at: order.created_at,
            total_count: order.total_count,
            total_amount: order.total_amount,
            freight: order.freight,
            pay_method: order.pay_method,
            status: order.status,
            lines,
        }
    }
}

/// A page of a user's orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderPage {
    /// Total number of orders the user has.
    pub count: u64,
    pub page: usize,
    pub page_size: usize,
    pub orders: Vec<OrderSummary>,
}
