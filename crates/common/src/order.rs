//! Order status and payment method enums shared by storage and domain.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a stored or submitted code is not a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownCode {
    pub kind: &'static str,
    pub value: String,
}

/// The status of an order in its lifecycle.
///
/// ```text
/// UNPAID ──► UNSENT ──► UNRECEIVED ──► UNCOMMENTED ──► FINISHED
///    │          │
///    └──────────┴──► CLOSED
/// ```
///
/// Only the `UNCOMMENTED → FINISHED` transition is driven from this system;
/// the rest belong to payment and fulfilment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Unpaid,
    Unsent,
    Unreceived,
    Uncommented,
    Finished,
    Closed,
}

impl OrderStatus {
    /// Returns the storage code of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Unpaid => "UNPAID",
            OrderStatus::Unsent => "UNSENT",
            OrderStatus::Unreceived => "UNRECEIVED",
            OrderStatus::Uncommented => "UNCOMMENTED",
            OrderStatus::Finished => "FINISHED",
            OrderStatus::Closed => "CLOSED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNPAID" => Ok(OrderStatus::Unpaid),
            "UNSENT" => Ok(OrderStatus::Unsent),
            "UNRECEIVED" => Ok(OrderStatus::Unreceived),
            "UNCOMMENTED" => Ok(OrderStatus::Uncommented),
            "FINISHED" => Ok(OrderStatus::Finished),
            "CLOSED" => Ok(OrderStatus::Closed),
            other => Err(UnknownCode {
                kind: "order status",
                value: other.to_string(),
            }),
        }
    }
}

/// How the customer pays for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayMethod {
    CashOnDelivery,
    Prepaid,
}

impl PayMethod {
    /// Every supported payment method.
    pub const ALL: [PayMethod; 2] = [PayMethod::CashOnDelivery, PayMethod::Prepaid];

    /// Returns the storage code of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            PayMethod::CashOnDelivery => "CASH_ON_DELIVERY",
            PayMethod::Prepaid => "PREPAID",
        }
    }
}

impl std::fmt::Display for PayMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayMethod {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CASH_ON_DELIVERY" => Ok(PayMethod::CashOnDelivery),
            "PREPAID" => Ok(PayMethod::Prepaid),
            other => Err(UnknownCode {
                kind: "payment method",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip_through_strings() {
        for status in [
            OrderStatus::Unpaid,
            OrderStatus::Unsent,
            OrderStatus::Unreceived,
            OrderStatus::Uncommented,
            OrderStatus::Finished,
            OrderStatus::Closed,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
    }

    #[test]
    fn pay_method_serde_matches_storage_code() {
        let json = serde_json::to_string(&PayMethod::CashOnDelivery).unwrap();
        assert_eq!(json, "\"CASH_ON_DELIVERY\"");
        assert_eq!(
            serde_json::from_str::<PayMethod>("\"PREPAID\"").unwrap(),
            PayMethod::Prepaid
        );
    }

    #[test]
    fn unknown_codes_are_rejected() {
        let err = "ALIPAY".parse::<PayMethod>().unwrap_err();
        assert_eq!(err.kind, "payment method");
        assert!("SHIPPED".parse::<OrderStatus>().is_err());
    }
}
