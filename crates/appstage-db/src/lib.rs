//! appstage database - SQLite persistence layer
//!
//! Multi-step operations run inside one transaction: callers take a
//! [`Tx`] from [`Database::begin`] and pass it to the repository methods,
//! which accept any `&mut SqliteConnection`.

pub mod apps;
pub mod schema;
pub mod syncs;
pub mod versions;

use appstage_core::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use tracing::info;

pub use apps::AppsRepository;
pub use sqlx::SqliteConnection;
pub use syncs::SyncRepository;
pub use versions::VersionStore;

/// Open storage transaction; rolls back on drop unless committed
pub type Tx = Transaction<'static, Sqlite>;

/// Database connection and operations
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::DbError(e.to_string()))?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        info!("Connecting to database: {}", url);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| Error::DbError(e.to_string()))?;

        // Set database file permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
                tracing::warn!("Failed to set database file permissions: {}", e);
            }
        }

        Self::init(pool).await
    }

    /// In-memory database; a single connection so every caller sees the same data
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::DbError(e.to_string()))?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self> {
        sqlx::query(schema::SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::DbError(e.to_string()))?;

        info!("Database initialized");
        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a transaction
    pub async fn begin(&self) -> Result<Tx> {
        self.pool
            .begin()
            .await
            .map_err(|e| Error::DbError(format!("Failed to begin transaction: {}", e)))
    }

    /// Get apps repository
    pub fn apps(&self) -> AppsRepository {
        AppsRepository
    }

    /// Get sync entries repository
    pub fn syncs(&self) -> SyncRepository {
        SyncRepository::new(self.pool.clone())
    }

    /// Close the database connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Commit a transaction
pub async fn commit(tx: Tx) -> Result<()> {
    tx.commit()
        .await
        .map_err(|e| Error::DbError(format!("Failed to commit transaction: {}", e)))
}

pub(crate) fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339()
}

pub(crate) fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
