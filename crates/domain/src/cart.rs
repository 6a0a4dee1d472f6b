//! Reading the checkout selection out of a cart.

use common::{SkuId, UserId};
use store::CartStore;
use tracing::warn;

use crate::error::Result;

/// One selected cart entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedItem {
    pub sku_id: SkuId,
    pub count: u32,
}

/// Returns the user's selected cart entries, ordered by variant id.
///
/// Selected variants with no quantity entry, or a zero quantity, are skipped.
pub async fn selected_items<C: CartStore>(cart: &C, user_id: UserId) -> Result<Vec<SelectedItem>> {
    let selected = cart.get_selected(user_id).await?;
    if selected.is_empty() {
        return Ok(Vec::new());
    }
    let quantities = cart.get_quantities(user_id).await?;

    let mut items: Vec<SelectedItem> = selected
        .into_iter()
        .filter_map(|sku_id| match quantities.get(&sku_id) {
            Some(&count) if count > 0 => Some(SelectedItem { sku_id, count }),
            _ => {
                warn!(user_id = %user_id, sku_id = %sku_id, "selected item has no quantity, skipping");
                None
            }
        })
        .collect();
    items.sort_by_key(|item| item.sku_id);

    Ok(items)
}
