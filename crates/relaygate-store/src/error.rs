//! Store error type.

/// Persistence layer failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unsupported database URL scheme")]
    UnsupportedScheme,
    #[error("unknown session handle {0}")]
    UnknownHandle(i64),
    #[error("required table `{0}` is missing; run migrations")]
    MissingTable(String),
}
