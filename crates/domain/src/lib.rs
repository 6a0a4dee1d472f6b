//! Domain layer for the order-commit system.
//!
//! This crate provides:
//! - [`StockReservation`]: the bounded compare-and-swap loop that moves
//!   variant stock to sales under concurrent access
//! - [`OrderService`]: assembles an order from the user's selected cart items
//!   inside one transaction, then prunes the cart
//! - [`settlement`]: the read-only checkout preview
//! - [`ReviewService`]: pending reviews, review submission and public
//!   per-variant listings
//! - [`CartCleanupSweeper`]: retries cart prunes that failed after commit

pub mod cart;
pub mod cleanup;
pub mod error;
pub mod order;
pub mod policy;
pub mod reservation;
pub mod review;
pub mod settlement;
mod transaction;

pub use cart::{SelectedItem, selected_items};
pub use cleanup::{CartCleanupSweeper, SweepReport, apply_cleanup};
pub use error::{OrderError, Result};
pub use order::{
    CommitOrder, CommittedOrder, OrderPage, OrderService, OrderSummary, OrderSummaryLine,
};
pub use policy::{OrderPolicy, PaymentStatusTable, PolicyError};
pub use reservation::{Reservation, StockReservation};
pub use review::{
    ANONYMOUS_DISPLAY_NAME, PendingReview, ReviewEntry, ReviewOutcome, ReviewService, ReviewSku,
    SubmitReview,
};
pub use settlement::{Settlement, SettlementLine};
