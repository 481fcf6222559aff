//! Engine configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use stock_store::{LockingStrategy, LowStockThreshold, OrderNumber};

use crate::retry::RetryPolicy;

/// Ordering engine configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `ORDERING_MIN_STOCK_PERCENT`: low-stock alert threshold, clamped to 0..=100 (default: `50`)
/// - `ORDERING_STARTING_ORDER_NUMBER`: first order number ever handed out (default: `1000`)
/// - `ORDERING_MAX_ATTEMPTS`: total attempts per order, at least 1 (default: `3`)
/// - `ORDERING_RETRY_BASE_DELAY_MS`: fixed part of the retry backoff (default: `10`)
/// - `ORDERING_RETRY_MAX_JITTER_MS`: upper bound of the random backoff part (default: `25`)
/// - `ORDERING_LOCK_TIMEOUT_MS`: how long a row lock wait may take (default: `5000`)
/// - `ORDERING_DEDUCTION_STRATEGY`: `pessimistic` or `optimistic` (default: `pessimistic`)
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone)]
pub struct OrderingConfig {
    pub min_stock_percent: i64,
    pub starting_order_number: i64,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_jitter: Duration,
    pub lock_timeout: Duration,
    pub deduction_strategy: LockingStrategy,
}

impl OrderingConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            min_stock_percent: parsed(&lookup, "ORDERING_MIN_STOCK_PERCENT")
                .unwrap_or(defaults.min_stock_percent),
            starting_order_number: parsed(&lookup, "ORDERING_STARTING_ORDER_NUMBER")
                .unwrap_or(defaults.starting_order_number),
            max_attempts: parsed(&lookup, "ORDERING_MAX_ATTEMPTS")
                .unwrap_or(defaults.max_attempts),
            retry_base_delay: parse("ORDERING_RETRY_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            retry_max_jitter: parse("ORDERING_RETRY_MAX_JITTER_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_max_jitter),
            lock_timeout: parse("ORDERING_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            deduction_strategy: parsed(&lookup, "ORDERING_DEDUCTION_STRATEGY")
                .unwrap_or(defaults.deduction_strategy),
        }
    }

    /// Returns the low-stock threshold, clamped to a valid percentage.
    pub fn threshold(&self) -> LowStockThreshold {
        LowStockThreshold::from_percent(self.min_stock_percent)
    }

    pub fn starting_order_number(&self) -> OrderNumber {
        OrderNumber::new(self.starting_order_number)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.retry_base_delay,
            self.retry_max_jitter,
        )
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            min_stock_percent: 50,
            starting_order_number: OrderNumber::DEFAULT_START.as_i64(),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(10),
            retry_max_jitter: Duration::from_millis(25),
            lock_timeout: Duration::from_millis(5000),
            deduction_strategy: LockingStrategy::Pessimistic,
        }
    }
}
