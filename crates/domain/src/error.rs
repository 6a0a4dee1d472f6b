//! Domain error types.

use common::SkuId;
use store::StoreError;
use thiserror::Error;

/// Errors returned by order commit, settlement and review operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// No cart items are selected for checkout.
    #[error("No items selected for checkout")]
    EmptyCart,

    /// A variant does not hold enough stock for the requested quantity.
    #[error("Insufficient stock for SKU {sku_id}: requested {requested}, available {available}")]
    InsufficientStock {
        sku_id: SkuId,
        requested: u32,
        available: u32,
    },

    /// A referenced order, line or variant does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller does not own the referenced order.
    #[error("Not authorized to access this order")]
    Unauthorized,

    /// Stock reservation kept losing the race to concurrent writers.
    #[error("Stock reservation for SKU {sku_id} gave up after {attempts} attempts")]
    Contention { sku_id: SkuId, attempts: u32 },

    /// A submitted review was rejected.
    #[error("Invalid review: {0}")]
    InvalidReview(String),

    /// The relational store or the cart cache failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl OrderError {
    /// Machine-readable error kind reported to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            OrderError::EmptyCart => "empty_cart",
            OrderError::InsufficientStock { .. } => "insufficient_stock",
            OrderError::NotFound(_) => "not_found",
            OrderError::Unauthorized => "unauthorized",
            OrderError::Contention { .. } => "contention",
            OrderError::InvalidReview(_) => "invalid_request",
            OrderError::Store(_) => "store",
        }
    }
}

/// Convenience type alias for domain results.
pub type Result<T> = std::result::Result<T, OrderError>;
