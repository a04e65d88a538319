//! Apps repository - CRUD operations for app entries

use appstage_core::{AppEntry, AppId, AppPathDomain, Error, Result};
use chrono::Utc;
use sqlx::{Row, SqliteConnection};

use crate::{format_time, parse_time};

const APP_COLUMNS: &str = "id, path, domain, source_url, is_dev, main_app, user_id, \
                           create_time, update_time, settings, metadata";

/// Repository for app operations; every call runs on the caller's connection
pub struct AppsRepository;

impl AppsRepository {

    /// Insert a new app
    pub async fn insert(&self, conn: &mut SqliteConnection, entry: &AppEntry) -> Result<()> {
        let settings_json = serde_json::to_string(&entry.settings)?;
        let metadata_json = serde_json::to_string(&entry.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO apps (
                id, path, domain, source_url, is_dev, main_app, user_id,
                create_time, update_time, settings, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.as_str())
        .bind(&entry.path)
        .bind(&entry.domain)
        .bind(&entry.source_url)
        .bind(entry.is_dev)
        .bind(entry.main_app.as_str())
        .bind(&entry.user_id)
        .bind(format_time(&entry.create_time))
        .bind(format_time(&entry.update_time))
        .bind(&settings_json)
        .bind(&metadata_json)
        .execute(&mut *conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::AppAlreadyExists(entry.app_path_domain().to_string())
            }
            other => Error::DbError(other.to_string()),
        })?;

        Ok(())
    }

    /// Get app by path and domain
    pub async fn get(
        &self,
        conn: &mut SqliteConnection,
        path: &AppPathDomain,
    ) -> Result<Option<AppEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM apps WHERE path = ? AND domain = ?",
            APP_COLUMNS
        ))
        .bind(&path.path)
        .bind(&path.domain)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| Error::DbError(e.to_string()))?;

        row.as_ref().map(row_to_app_entry).transpose()
    }

    /// Get app by path and domain, failing when it does not exist
    pub async fn require(
        &self,
        conn: &mut SqliteConnection,
        path: &AppPathDomain,
    ) -> Result<AppEntry> {
        self.get(conn, path)
            .await?
            .ok_or_else(|| Error::AppNotFound(path.to_string()))
    }

    /// Get all apps inside a transaction
    pub async fn get_all_tx(&self, conn: &mut SqliteConnection, internal: bool) -> Result<Vec<AppEntry>> {
        let query = if internal {
            format!("SELECT {} FROM apps ORDER BY domain, path", APP_COLUMNS)
        } else {
            format!(
                "SELECT {} FROM apps WHERE main_app = '' ORDER BY domain, path",
                APP_COLUMNS
            )
        };
        let rows = sqlx::query(&query)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| Error::DbError(e.to_string()))?;

        rows.iter().map(row_to_app_entry).collect()
    }

    /// Get the apps linked to a main app (its staging app)
    pub async fn get_linked_apps(
        &self,
        conn: &mut SqliteConnection,
        main_app: &AppId,
    ) -> Result<Vec<AppEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM apps WHERE main_app = ? ORDER BY path",
            APP_COLUMNS
        ))
        .bind(main_app.as_str())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| Error::DbError(e.to_string()))?;

        rows.iter().map(row_to_app_entry).collect()
    }

    /// Update app metadata, along with the metadata of its current version
    pub async fn update_metadata(&self, conn: &mut SqliteConnection, entry: &AppEntry) -> Result<()> {
        let metadata_json = serde_json::to_string(&entry.metadata)?;

        let result = sqlx::query("UPDATE apps SET metadata = ?, update_time = ? WHERE id = ?")
            .bind(&metadata_json)
            .bind(format_time(&Utc::now()))
            .bind(entry.id.as_str())
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::DbError(e.to_string()))?;
        ensure_updated(result.rows_affected(), entry)?;

        if !entry.is_dev {
            sqlx::query("UPDATE app_versions SET metadata = ? WHERE appid = ? AND version = ?")
                .bind(&metadata_json)
                .bind(entry.id.as_str())
                .bind(entry.version())
                .execute(&mut *conn)
                .await
                .map_err(|e| Error::DbError(e.to_string()))?;
        }

        Ok(())
    }

    /// Update app settings
    pub async fn update_settings(&self, conn: &mut SqliteConnection, entry: &AppEntry) -> Result<()> {
        let settings_json = serde_json::to_string(&entry.settings)?;

        let result = sqlx::query("UPDATE apps SET settings = ?, update_time = ? WHERE id = ?")
            .bind(&settings_json)
            .bind(format_time(&Utc::now()))
            .bind(entry.id.as_str())
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::DbError(e.to_string()))?;

        ensure_updated(result.rows_affected(), entry)
    }

    /// Delete an app and its version associations
    pub async fn delete(&self, conn: &mut SqliteConnection, id: &AppId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM apps WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::DbError(e.to_string()))?;

        sqlx::query("DELETE FROM app_files WHERE appid = ?")
            .bind(id.as_str())
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::DbError(e.to_string()))?;

        sqlx::query("DELETE FROM app_versions WHERE appid = ?")
            .bind(id.as_str())
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::DbError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

fn ensure_updated(rows: u64, entry: &AppEntry) -> Result<()> {
    if rows == 0 {
        return Err(Error::AppNotFound(entry.app_path_domain().to_string()));
    }
    Ok(())
}

fn row_to_app_entry(row: &sqlx::sqlite::SqliteRow) -> Result<AppEntry> {
    let id: String = row.get("id");
    let path: String = row.get("path");
    let domain: String = row.get("domain");
    let source_url: String = row.get("source_url");
    let is_dev: bool = row.get("is_dev");
    let main_app: String = row.get("main_app");
    let user_id: String = row.get("user_id");
    let create_time: String = row.get("create_time");
    let update_time: String = row.get("update_time");
    let settings_json: String = row.get("settings");
    let metadata_json: String = row.get("metadata");

    Ok(AppEntry {
        id: AppId(id),
        path,
        domain,
        source_url,
        is_dev,
        main_app: AppId(main_app),
        user_id,
        create_time: parse_time(&create_time),
        update_time: parse_time(&update_time),
        settings: serde_json::from_str(&settings_json)?,
        metadata: serde_json::from_str(&metadata_json)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_db;
    use appstage_core::{AppMetadata, AppSettings};

    fn entry(id: &str, path: &str, main_app: &str) -> AppEntry {
        AppEntry {
            id: AppId::from(id),
            path: path.to_string(),
            domain: String::new(),
            source_url: "/srv/app".to_string(),
            is_dev: false,
            main_app: AppId::from(main_app),
            user_id: "admin".to_string(),
            create_time: Utc::now(),
            update_time: Utc::now(),
            settings: AppSettings::default(),
            metadata: AppMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (db, _dir) = setup_db().await;
        let apps = db.apps();
        let mut tx = db.begin().await.unwrap();

        apps.insert(&mut tx, &entry("app_prd_1", "/blog", "")).await.unwrap();

        let found = apps
            .get(&mut tx, &AppPathDomain::new("", "/blog"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, AppId::from("app_prd_1"));
        assert_eq!(found.user_id, "admin");

        let missing = apps.get(&mut tx, &AppPathDomain::new("x.com", "/blog")).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_path_rejected() {
        let (db, _dir) = setup_db().await;
        let apps = db.apps();
        let mut tx = db.begin().await.unwrap();

        apps.insert(&mut tx, &entry("app_prd_1", "/blog", "")).await.unwrap();
        let err = apps
            .insert(&mut tx, &entry("app_prd_2", "/blog", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AppAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_linked_apps_and_listing() {
        let (db, _dir) = setup_db().await;
        let apps = db.apps();
        let mut tx = db.begin().await.unwrap();

        apps.insert(&mut tx, &entry("app_prd_1", "/blog", "")).await.unwrap();
        apps.insert(&mut tx, &entry("app_stg_1", "/blog_cl_stage", "app_prd_1"))
            .await
            .unwrap();

        let linked = apps
            .get_linked_apps(&mut tx, &AppId::from("app_prd_1"))
            .await
            .unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].path, "/blog_cl_stage");

        assert_eq!(apps.get_all_tx(&mut tx, false).await.unwrap().len(), 1);
        assert_eq!(apps.get_all_tx(&mut tx, true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_metadata_and_settings() {
        let (db, _dir) = setup_db().await;
        let apps = db.apps();
        let mut tx = db.begin().await.unwrap();

        let mut app = entry("app_prd_1", "/blog", "");
        apps.insert(&mut tx, &app).await.unwrap();

        app.metadata.param_values.insert("title".into(), "Blog".into());
        app.settings.git_auth_name = "deploy".into();
        apps.update_metadata(&mut tx, &app).await.unwrap();
        apps.update_settings(&mut tx, &app).await.unwrap();

        let found = apps.require(&mut tx, &app.app_path_domain()).await.unwrap();
        assert_eq!(found.metadata.param_values["title"], "Blog");
        assert_eq!(found.settings.git_auth_name, "deploy");

        let unknown = entry("app_prd_9", "/none", "");
        assert!(matches!(
            apps.update_metadata(&mut tx, &unknown).await,
            Err(Error::AppNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete() {
        let (db, _dir) = setup_db().await;
        let apps = db.apps();
        let mut tx = db.begin().await.unwrap();

        apps.insert(&mut tx, &entry("app_prd_1", "/blog", "")).await.unwrap();
        assert!(apps.delete(&mut tx, &AppId::from("app_prd_1")).await.unwrap());
        assert!(!apps.delete(&mut tx, &AppId::from("app_prd_1")).await.unwrap());
        assert!(apps
            .get(&mut tx, &AppPathDomain::new("", "/blog"))
            .await
            .unwrap()
            .is_none());
    }
}
