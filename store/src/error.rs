use thiserror::Error;

/// A Result type specialized for persistence engine operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Duplicated index {index} on stream {partition_id}")]
    DuplicateStreamIndex { partition_id: String, index: i64 },

    #[error("No chunks were deleted from stream {0}")]
    StreamDelete(String),

    #[error("Stale snapshot for aggregate {aggregate_id} at version {version}")]
    StaleSnapshot { aggregate_id: String, version: i64 },

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("operation was cancelled")]
    Cancellation,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
