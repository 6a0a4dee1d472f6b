//! Checkout preview.

use common::{Money, SkuId, UserId};
use serde::Serialize;
use store::{CartStore, Database, Sku};
use tracing::debug;

use crate::cart::selected_items;
use crate::error::Result;

/// A selected variant as shown on the checkout page: the live variant
/// record plus the quantity requested in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementLine {
    pub id: SkuId,
    pub name: String,
    pub default_image_url: String,
    pub price: Money,
    pub stock: u32,
    pub comments: u32,
    pub count: u32,
}

impl SettlementLine {
    fn from_sku(sku: Sku, count: u32) -> Self {
        Self {
            id: sku.id,
            name: sku.name,
            default_image_url: sku.default_image_url,
            price: sku.price,
            stock: sku.stock,
            comments: sku.comments,
            count,
        }
    }

    /// Price times requested quantity.
    pub fn amount(&self) -> Money {
        self.price.multiply(self.count)
    }
}

/// Read-only checkout preview. Holds no stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settlement {
    pub freight: Money,
    pub skus: Vec<SettlementLine>,
}

impl Settlement {
    /// Sum of line amounts, without freight.
    pub fn goods_total(&self) -> Money {
        self.skus.iter().map(SettlementLine::amount).sum()
    }

    /// Amount the order would cost if committed now.
    pub fn total(&self) -> Money {
        self.goods_total() + self.freight
    }
}

/// Builds the checkout preview for a user from live variant records.
///
/// Selected variants that no longer exist are left out.
#[tracing::instrument(skip(db, cart, freight))]
pub async fn preview<D: Database, C: CartStore>(
    db: &D,
    cart: &C,
    user_id: UserId,
    freight: Money,
) -> Result<Settlement> {
    let items = selected_items(cart, user_id).await?;
    let ids: Vec<SkuId> = items.iter().map(|item| item.sku_id).collect();
    let skus = db.find_skus(&ids).await?;

    let lines: Vec<SettlementLine> = skus
        .into_iter()
        .filter_map(|sku| {
            let count = items.iter().find(|item| item.sku_id == sku.id)?.count;
            Some(SettlementLine::from_sku(sku, count))
        })
        .collect();

    debug!(lines = lines.len(), "settlement computed");

    Ok(Settlement {
        freight,
        skus: lines,
    })
}
