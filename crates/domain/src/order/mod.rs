//! Order commit and listing.

mod service;
mod view;

pub use service::{CommitOrder, CommittedOrder, OrderService};
pub use view::{OrderPage, OrderSummary, OrderSummaryLine};
