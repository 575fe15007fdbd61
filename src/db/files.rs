//! Downloaded file records and the shared resource bundle.

use sqlx::SqliteConnection;

use crate::error::DatabaseError;
use crate::types::{FileEntry, ResourceDescriptor, StorageType};
use crate::{Error, Result};

use super::{Database, FileRecord, GLOBAL_SCOPE};

impl Database {
    /// Record a file as present on disk
    pub(super) async fn upsert_file(
        conn: &mut SqliteConnection,
        scope: &str,
        file: &FileEntry,
    ) -> Result<()> {
        let size = i64::try_from(file.size).map_err(|_| {
            Error::InvalidDescriptor(format!(
                "size of {}/{} does not fit the database: {}",
                scope, file.name, file.size
            ))
        })?;

        sqlx::query(
            r#"
            INSERT INTO downloaded_files (scope, name, sha256, size, moment)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(scope, name) DO UPDATE SET
                sha256 = excluded.sha256,
                size = excluded.size,
                moment = excluded.moment
            "#,
        )
        .bind(scope)
        .bind(&file.name)
        .bind(&file.sha256)
        .bind(size)
        .bind(file.moment)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record file {}/{}: {}",
                scope, file.name, e
            )))
        })?;

        Ok(())
    }

    /// Record a single file fetched outside an issue download
    pub async fn save_file(&self, scope: &str, file: &FileEntry) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::upsert_file(&mut *conn, scope, file).await?;
        tracing::debug!(scope, file = %file.name, "Saved file record");
        Ok(())
    }

    /// Stored record of a downloaded file
    pub async fn get_file(&self, scope: &str, name: &str) -> Result<Option<FileEntry>> {
        let record: Option<FileRecord> = sqlx::query_as(
            r#"
            SELECT scope, name, sha256, size, moment
            FROM downloaded_files
            WHERE scope = ? AND name = ?
            "#,
        )
        .bind(scope)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to look up file {}/{}: {}",
                scope, name, e
            )))
        })?;

        Ok(record.map(|r| FileEntry {
            storage_type: if r.scope == GLOBAL_SCOPE {
                StorageType::Global
            } else {
                StorageType::Issue
            },
            name: r.name,
            sha256: r.sha256,
            size: r.size.max(0) as u64,
            moment: r.moment,
        }))
    }

    /// Version of the stored resource bundle, if any
    pub async fn resource_version(&self) -> Result<Option<i64>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM resource_info WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query resource version: {}",
                        e
                    )))
                })?;

        Ok(version)
    }

    /// Persist a downloaded resource bundle and record its files
    pub async fn save_resources(&self, resources: &ResourceDescriptor) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::write_resources(&mut *tx, resources).await?;
        tx.commit().await?;
        tracing::debug!(version = resources.version, "Saved resources");
        Ok(())
    }

    /// Write the resource bundle and its file records on `conn`
    pub(super) async fn write_resources(
        conn: &mut SqliteConnection,
        resources: &ResourceDescriptor,
    ) -> Result<()> {
        let json = serde_json::to_string(resources)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO resource_info (id, version, base_url, descriptor, updated_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                version = excluded.version,
                base_url = excluded.base_url,
                descriptor = excluded.descriptor,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(resources.version)
        .bind(&resources.base_url)
        .bind(&json)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save resources v{}: {}",
                resources.version, e
            )))
        })?;

        for file in &resources.files {
            Self::upsert_file(&mut *conn, GLOBAL_SCOPE, file).await?;
        }
        Ok(())
    }
}
