//! Version store - numbered, immutable snapshots of an app's source tree
//!
//! File content is stored once per sha256 in `files`; a version is the set
//! of `app_files` rows pointing at that content plus an `app_versions` row
//! holding the metadata active when the version was created.

use appstage_core::{
    AppFile, AppId, AppMetadata, AppVersion, Error, Result, COMPRESSION_THRESHOLD, GIT_DIR,
};
use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqliteConnection};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{format_time, parse_time};

const GZIP: &str = "gz";

/// A source file prepared for storage
#[derive(Debug)]
struct StoredFile {
    name: String,
    sha: String,
    compression_type: &'static str,
    content: Vec<u8>,
    size: i64,
}

/// Version operations scoped to one app id
#[derive(Debug, Clone)]
pub struct VersionStore {
    app_id: AppId,
}

impl VersionStore {
    pub fn new(app_id: AppId) -> Self {
        Self { app_id }
    }

    /// Greatest stored version, or 0 when none exists
    pub async fn get_highest_version(&self, conn: &mut SqliteConnection) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM app_versions WHERE appid = ?")
                .bind(self.app_id.as_str())
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| Error::DbError(e.to_string()))?;
        Ok(row.0)
    }

    /// Snapshot every file under `source_dir` as a new version
    ///
    /// Updates `metadata.version_metadata` to the new version number.
    pub async fn add_app_version(
        &self,
        conn: &mut SqliteConnection,
        metadata: &mut AppMetadata,
        source_dir: &Path,
        user_id: &str,
    ) -> Result<()> {
        let dir = source_dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || read_source_tree(&dir))
            .await
            .map_err(|e| Error::app(format!("Source walk failed: {}", e)))??;
        if files.is_empty() {
            return Err(Error::SourceEmpty(source_dir.to_path_buf()));
        }

        let highest = self.get_highest_version(conn).await?;
        self.advance_version(metadata, highest);
        let version = metadata.version_metadata.version;
        self.insert_version(conn, metadata, user_id).await?;

        let now = format_time(&Utc::now());
        for file in &files {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO files (sha, compression_type, content, create_time)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&file.sha)
            .bind(file.compression_type)
            .bind(&file.content)
            .bind(&now)
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::DbError(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO app_files (appid, version, name, sha, uncompressed_size, create_time)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(self.app_id.as_str())
            .bind(version)
            .bind(&file.name)
            .bind(&file.sha)
            .bind(file.size)
            .bind(&now)
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::DbError(e.to_string()))?;
        }

        debug!(
            "Stored {} files for {} version {}",
            files.len(),
            self.app_id,
            version
        );
        Ok(())
    }

    /// Create a new version pointing at the current version's files
    pub async fn increment_app_version(
        &self,
        conn: &mut SqliteConnection,
        metadata: &mut AppMetadata,
        user_id: &str,
    ) -> Result<()> {
        let current = metadata.version_metadata.version;
        let highest = self.get_highest_version(conn).await?;
        self.advance_version(metadata, highest);
        let version = metadata.version_metadata.version;
        self.insert_version(conn, metadata, user_id).await?;

        self.copy_files(conn, current, &self.app_id, version).await?;
        debug!("Incremented {} from version {} to {}", self.app_id, current, version);
        Ok(())
    }

    /// Associate this app's snapshot at `metadata`'s version with `target`
    pub async fn promote_app(
        &self,
        conn: &mut SqliteConnection,
        target: &AppId,
        metadata: &AppMetadata,
        user_id: &str,
    ) -> Result<()> {
        let version = metadata.version_metadata.version;
        let metadata_json = serde_json::to_string(metadata)?;

        sqlx::query(
            r#"
            INSERT INTO app_versions (appid, version, previous_version, user_id, metadata, create_time)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(target.as_str())
        .bind(version)
        .bind(metadata.version_metadata.previous_version)
        .bind(user_id)
        .bind(&metadata_json)
        .bind(format_time(&Utc::now()))
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::DbError(e.to_string()))?;

        self.copy_files(conn, version, target, version).await?;
        debug!("Promoted {} version {} to {}", self.app_id, version, target);
        Ok(())
    }

    /// Stored version, `None` when absent
    pub async fn get_app_version(
        &self,
        conn: &mut SqliteConnection,
        version: i64,
    ) -> Result<Option<AppVersion>> {
        let row = sqlx::query(
            r#"
            SELECT version, previous_version, user_id, metadata, create_time
            FROM app_versions WHERE appid = ? AND version = ?
            "#,
        )
        .bind(self.app_id.as_str())
        .bind(version)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| Error::DbError(e.to_string()))?;

        row.as_ref().map(row_to_app_version).transpose()
    }

    /// All stored versions, newest first
    pub async fn list_versions(&self, conn: &mut SqliteConnection) -> Result<Vec<AppVersion>> {
        let rows = sqlx::query(
            r#"
            SELECT version, previous_version, user_id, metadata, create_time
            FROM app_versions WHERE appid = ? ORDER BY version DESC
            "#,
        )
        .bind(self.app_id.as_str())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| Error::DbError(e.to_string()))?;

        rows.iter().map(row_to_app_version).collect()
    }

    /// Files of a version, by name
    pub async fn list_files(&self, conn: &mut SqliteConnection, version: i64) -> Result<Vec<AppFile>> {
        let rows = sqlx::query(
            r#"
            SELECT name, sha, uncompressed_size FROM app_files
            WHERE appid = ? AND version = ? ORDER BY name
            "#,
        )
        .bind(self.app_id.as_str())
        .bind(version)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| Error::DbError(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| AppFile {
                name: row.get("name"),
                sha: row.get("sha"),
                size: row.get("uncompressed_size"),
            })
            .collect())
    }

    /// Decompressed content of every file in a version
    pub async fn load_files(
        &self,
        conn: &mut SqliteConnection,
        version: i64,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        let rows = sqlx::query(
            r#"
            SELECT af.name, f.compression_type, f.content
            FROM app_files af JOIN files f ON af.sha = f.sha
            WHERE af.appid = ? AND af.version = ?
            "#,
        )
        .bind(self.app_id.as_str())
        .bind(version)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| Error::DbError(e.to_string()))?;

        let mut files = BTreeMap::new();
        for row in rows {
            let name: String = row.get("name");
            let compression_type: String = row.get("compression_type");
            let content: Vec<u8> = row.get("content");
            let content = if compression_type == GZIP {
                let mut decoded = Vec::new();
                GzDecoder::new(content.as_slice()).read_to_end(&mut decoded)?;
                decoded
            } else {
                content
            };
            files.insert(name, content);
        }
        Ok(files)
    }

    fn advance_version(&self, metadata: &mut AppMetadata, highest: i64) {
        let vm = &mut metadata.version_metadata;
        vm.previous_version = if highest == 0 { 0 } else { vm.version };
        vm.version = highest + 1;
    }

    async fn insert_version(
        &self,
        conn: &mut SqliteConnection,
        metadata: &AppMetadata,
        user_id: &str,
    ) -> Result<()> {
        let metadata_json = serde_json::to_string(metadata)?;
        sqlx::query(
            r#"
            INSERT INTO app_versions (appid, version, previous_version, user_id, metadata, create_time)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(self.app_id.as_str())
        .bind(metadata.version_metadata.version)
        .bind(metadata.version_metadata.previous_version)
        .bind(user_id)
        .bind(&metadata_json)
        .bind(format_time(&Utc::now()))
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::DbError(e.to_string()))?;
        Ok(())
    }

    async fn copy_files(
        &self,
        conn: &mut SqliteConnection,
        from_version: i64,
        target: &AppId,
        to_version: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO app_files (appid, version, name, sha, uncompressed_size, create_time)
            SELECT ?, ?, name, sha, uncompressed_size, ?
            FROM app_files WHERE appid = ? AND version = ?
            "#,
        )
        .bind(target.as_str())
        .bind(to_version)
        .bind(format_time(&Utc::now()))
        .bind(self.app_id.as_str())
        .bind(from_version)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::DbError(e.to_string()))?;
        Ok(())
    }
}

fn row_to_app_version(row: &sqlx::sqlite::SqliteRow) -> Result<AppVersion> {
    let metadata_json: String = row.get("metadata");
    let create_time: String = row.get("create_time");
    Ok(AppVersion {
        version: row.get("version"),
        previous_version: row.get("previous_version"),
        user_id: row.get("user_id"),
        create_time: parse_time(&create_time),
        metadata: serde_json::from_str(&metadata_json)?,
        active: false,
    })
}

fn read_source_tree(root: &Path) -> Result<Vec<StoredFile>> {
    let mut files = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                if entry.file_name() != GIT_DIR {
                    pending.push(path);
                }
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let name = relative_name(root, &path)?;
            let data = std::fs::read(&path)?;
            files.push(prepare_file(name, data)?);
        }
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|e| Error::app(format!("{} is outside {}: {}", path.display(), root.display(), e)))?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

fn prepare_file(name: String, data: Vec<u8>) -> Result<StoredFile> {
    let sha = hex::encode(Sha256::digest(&data));
    let size = data.len() as i64;
    if data.len() <= COMPRESSION_THRESHOLD {
        return Ok(StoredFile {
            name,
            sha,
            compression_type: "",
            content: data,
            size,
        });
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&data)?;
    Ok(StoredFile {
        name,
        sha,
        compression_type: GZIP,
        content: encoder.finish()?,
        size,
    })
}
