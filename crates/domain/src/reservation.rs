//! Stock reservation engine.
//!
//! Reserves stock with an optimistic compare-and-swap loop: read the variant,
//! then update it only if its stock is still the value that was read. A zero
//! row count means a concurrent writer won the race, so the loop re-reads and
//! tries again. No row lock is held between the read and the write.

use common::SkuId;
use store::{Sku, Transaction};
use tracing::{debug, warn};

use crate::error::{OrderError, Result};

/// Outcome of a successful reservation.
#[derive(Debug, Clone)]
pub struct Reservation {
    /// The variant as read by the winning attempt, before the decrement.
    pub sku: Sku,
    pub quantity: u32,
    /// Number of conditional updates issued, including the successful one.
    pub attempts: u32,
}

impl Reservation {
    /// Stock left on the variant right after this reservation.
    pub fn remaining_stock(&self) -> u32 {
        self.sku.stock - self.quantity
    }
}

/// Decrements variant stock under concurrent access.
#[derive(Debug, Clone, Copy)]
pub struct StockReservation {
    max_attempts: u32,
}

impl StockReservation {
    /// Creates an engine that gives up after `max_attempts` lost races.
    ///
    /// A bound of zero is treated as one attempt.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Returns the attempt bound.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Moves `quantity` units of `sku_id` from stock to sales, and adds the
    /// same amount to the parent product's sales, inside `tx`.
    ///
    /// Fails with [`OrderError::InsufficientStock`] as soon as a read shows
    /// less stock than requested, and with [`OrderError::Contention`] when
    /// every attempt lost its race.
    #[tracing::instrument(skip(self, tx), fields(max_attempts = self.max_attempts))]
    pub async fn reserve<T: Transaction>(
        &self,
        tx: &mut T,
        sku_id: SkuId,
        quantity: u32,
    ) -> Result<Reservation> {
        for attempt in 1..=self.max_attempts {
            let sku = tx
                .find_sku(sku_id)
                .await?
                .ok_or_else(|| OrderError::NotFound(format!("SKU {sku_id}")))?;

            if quantity > sku.stock {
                return Err(OrderError::InsufficientStock {
                    sku_id,
                    requested: quantity,
                    available: sku.stock,
                });
            }

            let new_stock = sku.stock - quantity;
            let new_sales = sku.sales.saturating_add(quantity);

            let affected = tx
                .update_stock_if_unchanged(sku_id, sku.stock, new_stock, new_sales)
                .await?;

            if affected == 1 {
                tx.add_goods_sales(sku.goods_id, quantity).await?;
                debug!(attempt, new_stock, "stock reserved");
                return Ok(Reservation {
                    sku,
                    quantity,
                    attempts: attempt,
                });
            }

            metrics::counter!("stock_reservation_retries_total").increment(1);
            debug!(attempt, expected_stock = sku.stock, "lost stock race, retrying");
        }

        warn!(attempts = self.max_attempts, "stock reservation exhausted its attempts");
        Err(OrderError::Contention {
            sku_id,
            attempts: self.max_attempts,
        })
    }
}

impl Default for StockReservation {
    fn default() -> Self {
        Self::new(crate::policy::DEFAULT_MAX_RESERVATION_ATTEMPTS)
    }
}
