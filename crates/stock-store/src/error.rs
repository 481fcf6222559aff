use thiserror::Error;

/// SQLSTATE codes that signal a transient concurrent-access failure.
const LOCK_NOT_AVAILABLE: &str = "55P03";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

/// Unique constraint guarding the human-facing order number.
pub(crate) const ORDER_NUMBER_CONSTRAINT: &str = "orders_order_number_key";

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A concurrent modification prevented the write from applying safely.
    ///
    /// Covers version mismatches, lock-wait timeouts, serialization failures
    /// and deadlocks. Always safe to retry with a fresh transaction.
    #[error("Write conflict on {entity}: {reason}")]
    Conflict { entity: &'static str, reason: String },

    /// A record referenced by the caller does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A record failed validation before it reached storage.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub(crate) fn conflict(entity: &'static str, reason: impl Into<String>) -> Self {
        StoreError::Conflict {
            entity,
            reason: reason.into(),
        }
    }

    /// Returns true if a fresh attempt may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code();
                match code.as_deref() {
                    Some(LOCK_NOT_AVAILABLE) => {
                        StoreError::conflict("row", "lock wait timed out")
                    }
                    Some(SERIALIZATION_FAILURE) => {
                        StoreError::conflict("transaction", "serialization failure")
                    }
                    Some(DEADLOCK_DETECTED) => StoreError::conflict("transaction", "deadlock"),
                    Some(UNIQUE_VIOLATION)
                        if db_err.constraint() == Some(ORDER_NUMBER_CONSTRAINT) =>
                    {
                        StoreError::conflict("order", "order number already allocated")
                    }
                    _ => StoreError::Database(err),
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            _ => StoreError::Database(err),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
