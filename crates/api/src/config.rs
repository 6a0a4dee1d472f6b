//! Application configuration loaded from environment variables.

use std::time::Duration;

use common::{Money, MoneyParseError};
use domain::{OrderPolicy, PaymentStatusTable, PolicyError};
use domain::cleanup::DEFAULT_CLEANUP_RETENTION_DAYS;
use domain::policy::{DEFAULT_FREIGHT_CENTS, DEFAULT_MAX_RESERVATION_ATTEMPTS};
use thiserror::Error;

/// Errors from reading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable holds a value that cannot be parsed.
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    /// `ORDER_FREIGHT` is not a decimal amount.
    #[error("Invalid ORDER_FREIGHT: {0}")]
    Freight(#[from] MoneyParseError),

    /// `PAY_METHOD_STATUS` is not a complete payment status table.
    #[error("Invalid PAY_METHOD_STATUS: {0}")]
    PaymentStatus(#[from] PolicyError),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `text` or `json` (default: `text`)
/// - `DATABASE_URL` — PostgreSQL URL; in-memory store when unset
/// - `REDIS_URL` — Redis URL for carts; in-memory carts when unset
/// - `ORDER_FREIGHT` — flat shipping charge (default: `"10.00"`)
/// - `RESERVATION_MAX_ATTEMPTS` — stock race attempts per variant (default: `16`)
/// - `CART_SWEEP_INTERVAL_SECS` — cart cleanup retry interval (default: `30`)
/// - `CART_CLEANUP_RETENTION_DAYS` — how long finished cart cleanups are kept
///   (default: `7`)
/// - `PAY_METHOD_STATUS` — initial status per payment method
///   (default: `"CASH_ON_DELIVERY=UNSENT,PREPAID=UNPAID"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub freight: Money,
    pub max_reservation_attempts: u32,
    pub cart_sweep_interval: Duration,
    pub cart_cleanup_retention: Duration,
    pub pay_method_status: PaymentStatusTable,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let log_format = match var("LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    value: other.to_string(),
                });
            }
        };

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse_var(var("PORT"), "PORT")?.unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            database_url: var("DATABASE_URL"),
            redis_url: var("REDIS_URL"),
            freight: match var("ORDER_FREIGHT") {
                Some(v) => v.parse()?,
                None => defaults.freight,
            },
            max_reservation_attempts: parse_var(
                var("RESERVATION_MAX_ATTEMPTS"),
                "RESERVATION_MAX_ATTEMPTS",
            )?
            .unwrap_or(defaults.max_reservation_attempts),
            cart_sweep_interval: parse_var(
                var("CART_SWEEP_INTERVAL_SECS"),
                "CART_SWEEP_INTERVAL_SECS",
            )?
            .map(Duration::from_secs)
            .unwrap_or(defaults.cart_sweep_interval),
            cart_cleanup_retention: parse_var::<u64>(
                var("CART_CLEANUP_RETENTION_DAYS"),
                "CART_CLEANUP_RETENTION_DAYS",
            )?
            .map(days)
            .unwrap_or(defaults.cart_cleanup_retention),
            pay_method_status: match var("PAY_METHOD_STATUS") {
                Some(v) => v.parse()?,
                None => defaults.pay_method_status,
            },
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the order-commit policy described by this configuration.
    pub fn policy(&self) -> OrderPolicy {
        OrderPolicy {
            freight: self.freight,
            max_reservation_attempts: self.max_reservation_attempts,
            statuses: self.pay_method_status.clone(),
        }
    }
}

fn days(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(24 * 60 * 60))
}

fn parse_var<T: std::str::FromStr>(
    value: Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value: v.clone() })
        })
        .transpose()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            redis_url: None,
            freight: Money::from_cents(DEFAULT_FREIGHT_CENTS),
            max_reservation_attempts: DEFAULT_MAX_RESERVATION_ATTEMPTS,
            cart_sweep_interval: Duration::from_secs(30),
            cart_cleanup_retention: days(u64::from(DEFAULT_CLEANUP_RETENTION_DAYS)),
            pay_method_status: PaymentStatusTable::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use common::{OrderStatus, PayMethod};

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert!(config.redis_url.is_none());
        assert_eq!(config.freight.to_string(), "10.00");
        assert_eq!(config.max_reservation_attempts, 16);
        assert_eq!(config.cart_sweep_interval, Duration::from_secs(30));
        assert_eq!(config.cart_cleanup_retention, Duration::from_secs(7 * 86_400));
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("PORT", "8081"),
            ("LOG_FORMAT", "json"),
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("ORDER_FREIGHT", "12.50"),
            ("RESERVATION_MAX_ATTEMPTS", "4"),
            ("CART_CLEANUP_RETENTION_DAYS", "1"),
            ("PAY_METHOD_STATUS", "CASH_ON_DELIVERY=UNPAID,PREPAID=UNPAID"),
        ])
        .unwrap();

        assert_eq!(config.port, 8081);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.cart_cleanup_retention, Duration::from_secs(86_400));
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/orders")
        );

        let policy = config.policy();
        assert_eq!(policy.freight, Money::from_cents(1250));
        assert_eq!(policy.max_reservation_attempts, 4);
        assert_eq!(
            policy.statuses.initial_status(PayMethod::CashOnDelivery),
            OrderStatus::Unpaid
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            load(&[("PORT", "http")]),
            Err(ConfigError::Invalid { name: "PORT", .. })
        ));
        assert!(matches!(
            load(&[("ORDER_FREIGHT", "ten")]),
            Err(ConfigError::Freight(_))
        ));
        assert!(matches!(
            load(&[("PAY_METHOD_STATUS", "PREPAID=UNPAID")]),
            Err(ConfigError::PaymentStatus(_))
        ));
        assert!(matches!(
            load(&[("LOG_FORMAT", "xml")]),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
