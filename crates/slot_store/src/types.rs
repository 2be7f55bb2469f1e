use std::time::Duration;

/// Errors raised by the persistent cache.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The SQLite backend failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A cached value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The requested time-to-live does not fit in a timestamp.
    #[error("Invalid time-to-live: {0:?}")]
    InvalidTtl(Duration),
}
