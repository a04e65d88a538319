//! Sync repository - persisted recurring apply jobs

use appstage_core::{Error, Result, SyncEntry, SyncJobStatus};
use sqlx::sqlite::SqlitePool;
use sqlx::{Row, SqliteConnection};

use crate::{format_time, parse_time};

/// Repository for sync entries
pub struct SyncRepository {
    pool: SqlitePool,
}

impl SyncRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new sync entry
    pub async fn create(&self, conn: &mut SqliteConnection, entry: &SyncEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync (id, path, is_scheduled, user_id, create_time, metadata, status)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.path)
        .bind(entry.is_scheduled)
        .bind(&entry.user_id)
        .bind(format_time(&entry.create_time))
        .bind(serde_json::to_string(&entry.metadata)?)
        .bind(serde_json::to_string(&entry.status)?)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::DbError(e.to_string()))?;

        Ok(())
    }

    /// Get a sync entry by id
    pub async fn get(&self, conn: &mut SqliteConnection, id: &str) -> Result<SyncEntry> {
        let row = sqlx::query(
            "SELECT id, path, is_scheduled, user_id, create_time, metadata, status FROM sync WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| Error::DbError(e.to_string()))?;

        match row {
            Some(row) => row_to_sync_entry(&row),
            None => Err(Error::SyncNotFound(id.to_string())),
        }
    }

    /// Get all sync entries
    pub async fn list(&self) -> Result<Vec<SyncEntry>> {
        let rows = sqlx::query(
            "SELECT id, path, is_scheduled, user_id, create_time, metadata, status FROM sync ORDER BY create_time",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DbError(e.to_string()))?;

        rows.iter().map(row_to_sync_entry).collect()
    }

    /// Delete a sync entry
    pub async fn delete(&self, conn: &mut SqliteConnection, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM sync WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::DbError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::SyncNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Record the outcome of a sync run
    pub async fn update_status(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        status: &SyncJobStatus,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE sync SET status = ? WHERE id = ?")
            .bind(serde_json::to_string(status)?)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::DbError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::SyncNotFound(id.to_string()));
        }
        Ok(())
    }
}

fn row_to_sync_entry(row: &sqlx::sqlite::SqliteRow) -> Result<SyncEntry> {
    let create_time: String = row.get("create_time");
    let metadata_json: String = row.get("metadata");
    let status_json: String = row.get("status");

    Ok(SyncEntry {
        id: row.get("id"),
        path: row.get("path"),
        is_scheduled: row.get("is_scheduled"),
        user_id: row.get("user_id"),
        create_time: parse_time(&create_time),
        metadata: serde_json::from_str(&metadata_json)?,
        status: serde_json::from_str(&status_json)?,
    })
}
