//! Relational storage.
//!
//! One Postgres pool backs both the key-value reservation store (when the
//! store URL points at Postgres) and the booking history. Schema changes are
//! applied at startup with sqlx's runtime migrator.

mod error;
mod history;

pub use error::DbError;
pub use history::{BookingHistory, BookingRecord, HistoryStore, MemoryHistory, UsageRow};

use std::path::PathBuf;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl DbConfig {
    pub fn new(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Shared Postgres pool for history and, optionally, reservations.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(max_connections = config.max_connections, "Connecting to booking database");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        debug!("Booking database pool ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the booker schema.
    ///
    /// Migrations are read from `BOOKER_MIGRATIONS` when set, otherwise from
    /// the crate's `migrations/` directory.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        let dir = migrations_dir();
        info!(migrations_dir = %dir.display(), "Running database migrations");

        let migrator = sqlx::migrate::Migrator::new(dir.clone())
            .await
            .map_err(|e| DbError::MigrationDirNotFound {
                tried: dir.display().to_string(),
                last_error: e.to_string(),
            })?;
        migrator.run(&self.pool).await.map_err(DbError::Migration)?;

        info!(applied = migrator.iter().count(), "Database schema up to date");
        Ok(())
    }
}

fn migrations_dir() -> PathBuf {
    std::env::var_os("BOOKER_MIGRATIONS")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"))
}
