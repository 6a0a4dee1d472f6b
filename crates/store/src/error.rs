use thiserror::Error;

/// Errors that can occur when talking to the relational store or cart cache.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The cart cache could not be reached or rejected a command.
    #[error("Cart cache error: {0}")]
    Cache(#[from] redis::RedisError),

    /// The backing service refused the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored row held a value the model cannot represent.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl From<common::UnknownCode> for StoreError {
    fn from(e: common::UnknownCode) -> Self {
        StoreError::InvalidData(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
