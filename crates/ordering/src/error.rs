//! Order placement error types.

use common::{IngredientId, ProductId};
use serde::{Deserialize, Serialize};
use stock_store::StoreError;
use thiserror::Error;

/// Errors that can occur while placing an order.
#[derive(Debug, Error)]
pub enum OrderError {
    /// An ingredient does not have enough remaining stock for the order.
    #[error("Insufficient stock for {name}: requested {requested}, available {available}")]
    InsufficientStock {
        ingredient_id: IngredientId,
        name: String,
        requested: i64,
        available: i64,
    },

    /// The order references a product that does not exist.
    #[error("Product not found: {0}")]
    UnknownProduct(ProductId),

    /// A product recipe references an ingredient that does not exist.
    #[error("Ingredient not found: {0}")]
    UnknownIngredient(IngredientId),

    /// A line quantity is below 1, or a derived amount overflowed.
    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: ProductId, quantity: i64 },

    /// The order has no lines.
    #[error("Order has no items")]
    EmptyOrder,

    /// A concurrent writer invalidated this attempt.
    #[error("Write conflict: {0}")]
    WriteConflict(String),

    /// Every allowed attempt hit a retryable failure.
    #[error("Order failed after {attempts} attempts: {last_reason}")]
    RetriesExhausted { attempts: u32, last_reason: String },

    /// The store could not be reached.
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Any other store failure.
    #[error("Store error: {0}")]
    Store(#[source] StoreError),
}

impl OrderError {
    /// Returns true if a fresh attempt in a new transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrderError::WriteConflict(_))
    }

    /// Returns the caller-facing category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            OrderError::InsufficientStock { .. }
            | OrderError::InvalidQuantity { .. }
            | OrderError::EmptyOrder => ErrorCategory::Rejected,
            OrderError::UnknownProduct(_) | OrderError::UnknownIngredient(_) => {
                ErrorCategory::NotFound
            }
            OrderError::PersistenceUnavailable(_) => ErrorCategory::Unavailable,
            OrderError::WriteConflict(_)
            | OrderError::RetriesExhausted { .. }
            | OrderError::Store(_) => ErrorCategory::Failed,
        }
    }

    /// Short label used for the `reason` metric dimension.
    pub fn reason(&self) -> &'static str {
        match self {
            OrderError::InsufficientStock { .. } => "insufficient_stock",
            OrderError::UnknownProduct(_) => "unknown_product",
            OrderError::UnknownIngredient(_) => "unknown_ingredient",
            OrderError::InvalidQuantity { .. } => "invalid_quantity",
            OrderError::EmptyOrder => "empty_order",
            OrderError::WriteConflict(_) => "write_conflict",
            OrderError::RetriesExhausted { .. } => "retries_exhausted",
            OrderError::PersistenceUnavailable(_) => "unavailable",
            OrderError::Store(_) => "store",
        }
    }
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => OrderError::WriteConflict(err.to_string()),
            StoreError::Unavailable(reason) => OrderError::PersistenceUnavailable(reason),
            other => OrderError::Store(other),
        }
    }
}

/// Coarse failure class exposed to callers instead of internal detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The request was understood but cannot be fulfilled as asked.
    Rejected,
    /// Something the request refers to does not exist.
    NotFound,
    /// The backing store is down; try again later.
    Unavailable,
    Failed,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Rejected => write!(f, "rejected"),
            ErrorCategory::NotFound => write!(f, "not_found"),
            ErrorCategory::Unavailable => write!(f, "unavailable"),
            ErrorCategory::Failed => write!(f, "failed"),
        }
    }
}

/// Result type for order operations.
pub type Result<T> = std::result::Result<T, OrderError>;
