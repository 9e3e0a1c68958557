use thiserror::Error;

/// Errors from the history and reservation databases.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("cannot reach booking database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("booking database query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("applying booker schema failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// The migrations directory is missing or unreadable.
    #[error("cannot load booker migrations from {tried}: {last_error}")]
    MigrationDirNotFound { tried: String, last_error: String },
}
