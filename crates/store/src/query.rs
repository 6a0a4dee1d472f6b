use common::{OrderId, SkuId};

use crate::model::OrderLine;

/// Builder for constructing order-line queries.
///
/// Lines can be filtered by order, by variant and by whether they have been
/// reviewed. Results come back oldest first unless [`LineQuery::newest_first`]
/// is set.
#[derive(Debug, Clone, Default)]
pub struct LineQuery {
    /// Filter by owning order; an empty list matches no line.
    pub order_ids: Option<Vec<OrderId>>,

    /// Filter by purchased variant.
    pub sku_id: Option<SkuId>,

    /// Filter by the "is reviewed" flag.
    pub is_commented: Option<bool>,

    /// Order by last update, newest first.
    pub newest_first: bool,
}

impl LineQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for the lines of one order.
    pub fn for_order(order_id: OrderId) -> Self {
        Self::for_orders(vec![order_id])
    }

    /// Creates a query for the lines of several orders at once.
    pub fn for_orders(order_ids: Vec<OrderId>) -> Self {
        Self {
            order_ids: Some(order_ids),
            ..Default::default()
        }
    }

    /// Creates a query for every line that purchased a variant.
    pub fn for_sku(sku_id: SkuId) -> Self {
        Self {
            sku_id: Some(sku_id),
            ..Default::default()
        }
    }

    /// Filters by variant.
    pub fn sku_id(mut self, sku_id: SkuId) -> Self {
        self.sku_id = Some(sku_id);
        self
    }

    /// Keeps only reviewed (`true`) or unreviewed (`false`) lines.
    pub fn commented(mut self, is_commented: bool) -> Self {
        self.is_commented = Some(is_commented);
        self
    }

    /// Returns the most recently updated lines first.
    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    /// Returns true if the line passes every filter of this query.
    pub fn matches(&self, line: &OrderLine) -> bool {
        if let Some(ref order_ids) = self.order_ids
            && !order_ids.contains(&line.order_id)
        {
            return false;
        }
        if let Some(sku_id) = self.sku_id
            && line.sku_id != sku_id
        {
            return false;
        }
        if let Some(is_commented) = self.is_commented
            && line.is_commented != is_commented
        {
            return false;
        }
        true
    }
}
