//! Tunable order-commit policy.

use std::collections::HashMap;
use std::str::FromStr;

use common::{Money, OrderStatus, PayMethod, UnknownCode};
use thiserror::Error;

/// Default flat shipping charge added to every order.
pub const DEFAULT_FREIGHT_CENTS: i64 = 1000;

/// Default bound on conditional-update attempts per variant.
pub const DEFAULT_MAX_RESERVATION_ATTEMPTS: u32 = 16;

/// Errors from reading a policy setting.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// An entry is not of the form `METHOD=STATUS`.
    #[error("Malformed payment status entry: {0:?}")]
    Malformed(String),

    /// An entry names an unknown method or status.
    #[error(transparent)]
    UnknownCode(#[from] UnknownCode),

    /// The table has no entry for a supported payment method.
    #[error("No initial status configured for payment method {0}")]
    Missing(PayMethod),
}

/// Maps each payment method to the status a new order starts in.
///
/// Always holds an entry for every [`PayMethod`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentStatusTable {
    statuses: HashMap<PayMethod, OrderStatus>,
}

impl PaymentStatusTable {
    /// Returns the initial status for orders paid with `method`.
    pub fn initial_status(&self, method: PayMethod) -> OrderStatus {
        self.statuses
            .get(&method)
            .copied()
            .unwrap_or(OrderStatus::Unpaid)
    }

    /// Overrides the initial status of one payment method.
    pub fn with(mut self, method: PayMethod, status: OrderStatus) -> Self {
        self.statuses.insert(method, status);
        self
    }
}

impl Default for PaymentStatusTable {
    fn default() -> Self {
        Self {
            statuses: HashMap::from([
                (PayMethod::CashOnDelivery, OrderStatus::Unsent),
                (PayMethod::Prepaid, OrderStatus::Unpaid),
            ]),
        }
    }
}

impl FromStr for PaymentStatusTable {
    type Err = PolicyError;

    /// Parses `CASH_ON_DELIVERY=UNSENT,PREPAID=UNPAID`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut statuses = HashMap::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (method, status) = entry
                .split_once('=')
                .ok_or_else(|| PolicyError::Malformed(entry.to_string()))?;
            statuses.insert(method.trim().parse()?, status.trim().parse()?);
        }

        if let Some(missing) = PayMethod::ALL.iter().find(|m| !statuses.contains_key(*m)) {
            return Err(PolicyError::Missing(*missing));
        }

        Ok(Self { statuses })
    }
}

/// Settings that shape every order commit.
#[derive(Debug, Clone)]
pub struct OrderPolicy {
    /// Flat shipping charge added to the order total.
    pub freight: Money,
    /// Conditional-update attempts per variant before giving up.
    pub max_reservation_attempts: u32,
    pub statuses: PaymentStatusTable,
}

impl Default for OrderPolicy {
    fn default() -> Self {
        Self {
            freight: Money::from_cents(DEFAULT_FREIGHT_CENTS),
            max_reservation_attempts: DEFAULT_MAX_RESERVATION_ATTEMPTS,
            statuses: PaymentStatusTable::default(),
        }
    }
}
