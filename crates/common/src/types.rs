use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Creates the id from its raw database value.
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw database value.
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

integer_id!(
    /// Identifier of an authenticated user.
    UserId
);

integer_id!(
    /// Identifier of a product variant (SKU), the unit of stock tracking.
    SkuId
);

integer_id!(
    /// Identifier of the parent product (SPU) that groups variants.
    GoodsId
);

integer_id!(
    /// Reference to a shipping address owned by the address subsystem.
    AddressId
);

/// Width of the zero-padded user suffix in an [`OrderId`].
const USER_SUFFIX_WIDTH: usize = 9;

/// Order identifier.
///
/// Built from the creation time at second precision followed by the
/// zero-padded user id, e.g. `20240102030405000000042`. Ids of the same
/// width sort lexically by creation time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Generates the id for an order placed by `user` at `now`.
    pub fn generate(now: DateTime<Utc>, user: UserId) -> Self {
        Self(format!(
            "{}{:0width$}",
            now.format("%Y%m%d%H%M%S"),
            user.as_i64(),
            width = USER_SUFFIX_WIDTH
        ))
    }

    /// Wraps an existing id, e.g. one read back from storage or a URL.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for OrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
