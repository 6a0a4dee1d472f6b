//! Shared types for the order-commit system.
//!
//! Identifier newtypes keep user, variant, product and order ids from being
//! mixed up, and [`Money`] carries every monetary amount as fixed-point cents.

pub mod money;
pub mod order;
pub mod types;

pub use money::{Money, MoneyParseError};
pub use order::{OrderStatus, PayMethod, UnknownCode};
pub use types::{AddressId, GoodsId, OrderId, SkuId, UserId};
