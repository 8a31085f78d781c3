use common::OrderId;
use domain::{DomainError, OrderStatus, ReconciliationId};
use thiserror::Error;

/// Errors that can occur when interacting with the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend could not serve the request.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The requested entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A conditional status update found the order in another status.
    #[error("Order {order_id} is {actual}, expected {expected}")]
    StatusConflict {
        order_id: OrderId,
        expected: OrderStatus,
        actual: OrderStatus,
    },

    /// The reconciliation item was closed before.
    #[error("Reconciliation item {0} is already resolved")]
    AlreadyResolved(ReconciliationId),

    /// A domain rule rejected the write.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(err) => !matches!(
                err,
                sqlx::Error::RowNotFound
                    | sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::Decode(_)
            ),
            _ => false,
        }
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_is_retryable() {
        assert!(StoreError::Unavailable("connection reset".into()).is_retryable());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_retryable());
    }

    #[test]
    fn logical_errors_are_not_retryable() {
        let err = StoreError::NotFound {
            entity: "Order",
            id: "x".into(),
        };
        assert!(!err.is_retryable());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_retryable());
    }
}
