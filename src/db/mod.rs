//! Database layer for issue-cache
//!
//! Handles SQLite persistence for downloaded issues, the files they consist
//! of, the shared resource bundle and per-article reading state.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: database lifecycle, schema migrations
//! - [`issues`]: issue metadata, stubs, article state, deletion
//! - [`files`]: downloaded file records and the resource bundle
//!
//! The content service talks to persistence only through the
//! [`IssueRepository`] trait, which [`Database`] implements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

use crate::Result;
use crate::types::{
    ArticleStub, FileEntry, Issue, IssueDescriptor, IssueKey, IssuePublication, IssueStatus,
    IssueStub, ResourceDescriptor, StorageType,
};

mod files;
mod issues;
mod migrations;

/// Scope name shared by all global files
pub const GLOBAL_SCOPE: &str = "global";

/// Storage scope of a file: `"global"` or `"{feed}/{date}"`
///
/// Issue files are scoped to the publication, not the variant, so that a
/// file already fetched for one variant is reused by another.
pub fn file_scope(storage_type: StorageType, publication: &IssuePublication) -> String {
    match storage_type {
        StorageType::Global => GLOBAL_SCOPE.to_string(),
        StorageType::Issue => publication.to_string(),
    }
}

/// Persistence operations the content service depends on
#[async_trait]
pub trait IssueRepository: Send + Sync {
    /// Whether the variant was fully downloaded
    async fn is_downloaded(&self, key: &IssueKey) -> Result<bool>;

    /// Persist a downloaded issue and record its files
    ///
    /// `resources` is the bundle fetched alongside the issue, if any. It is
    /// stored atomically with the issue.
    async fn save(
        &self,
        descriptor: &IssueDescriptor,
        resources: Option<&ResourceDescriptor>,
        downloaded_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Persist issue metadata only; a downloaded variant is left untouched
    async fn save_metadata(&self, descriptor: &IssueDescriptor) -> Result<()>;

    /// Load a stored issue with its reading state
    async fn get(&self, key: &IssueKey) -> Result<Option<Issue>>;

    /// Most valuable downloaded variant of a publication with status >= `min_status`
    async fn most_valuable_key(
        &self,
        publication: &IssuePublication,
        min_status: IssueStatus,
    ) -> Result<Option<IssueKey>>;

    /// Most valuable stored variant, including metadata-only records
    async fn stored_key(
        &self,
        publication: &IssuePublication,
        min_status: IssueStatus,
    ) -> Result<Option<IssueKey>>;

    /// Stored record of a downloaded file
    async fn downloaded_file(&self, scope: &str, name: &str) -> Result<Option<FileEntry>>;

    /// Version of the stored resource bundle
    async fn resource_version(&self) -> Result<Option<i64>>;

    /// Record a single file as present on disk
    async fn save_file(&self, scope: &str, file: &FileEntry) -> Result<()>;

    /// Update the mutable fields of a stored issue; returns false if not stored
    async fn update_issue_stub(&self, stub: &IssueStub) -> Result<bool>;

    /// Persist an article's reading state
    async fn update_article_stub(&self, stub: &ArticleStub) -> Result<()>;

    /// Remove every variant of a publication; returns the removed keys
    async fn delete_publication(&self, publication: &IssuePublication) -> Result<Vec<IssueKey>>;
}

/// Stored issue row
#[derive(Debug, Clone, FromRow)]
pub struct IssueRecord {
    /// Feed name
    pub feed: String,
    /// Publication date (ISO 8601)
    pub date: String,
    /// Status (see [`IssueStatus::to_i32`])
    pub status: i32,
    /// Base URL of issue files
    pub base_url: String,
    /// Minimum resource version
    pub min_resource_version: i64,
    /// Issue descriptor as JSON
    pub descriptor: String,
    /// Download completion (unix millis)
    pub downloaded_at: Option<i64>,
    /// Last displayed position
    pub last_displayable: Option<String>,
}

/// Stored file row
#[derive(Debug, Clone, FromRow)]
pub struct FileRecord {
    /// `"global"` or `"{feed}/{date}"`
    pub scope: String,
    /// File name
    pub name: String,
    /// Lowercase hex SHA-256
    pub sha256: String,
    /// Size in bytes
    pub size: i64,
    /// Modification time (unix millis)
    pub moment: i64,
}

/// Stored reading state of an article
#[derive(Debug, Clone, FromRow)]
pub struct ArticleStateRecord {
    /// Article key
    pub article_key: String,
    /// Bookmark flag
    pub bookmarked: bool,
    /// Reading progress (0-100)
    pub read_percentage: i64,
    /// Opaque scroll position
    pub read_position: Option<String>,
}

/// Database handle for issue-cache
pub struct Database {
    pool: SqlitePool,
}

#[async_trait]
impl IssueRepository for Database {
    async fn is_downloaded(&self, key: &IssueKey) -> Result<bool> {
        Database::is_downloaded(self, key).await
    }

    async fn save(
        &self,
        descriptor: &IssueDescriptor,
        resources: Option<&ResourceDescriptor>,
        downloaded_at: DateTime<Utc>,
    ) -> Result<()> {
        self.save_download(descriptor, resources, downloaded_at).await
    }

    async fn save_metadata(&self, descriptor: &IssueDescriptor) -> Result<()> {
        Database::save_metadata(self, descriptor).await
    }

    async fn get(&self, key: &IssueKey) -> Result<Option<Issue>> {
        self.get_issue(key).await
    }

    async fn most_valuable_key(
        &self,
        publication: &IssuePublication,
        min_status: IssueStatus,
    ) -> Result<Option<IssueKey>> {
        Database::most_valuable_key(self, publication, min_status).await
    }

    async fn stored_key(
        &self,
        publication: &IssuePublication,
        min_status: IssueStatus,
    ) -> Result<Option<IssueKey>> {
        Database::stored_key(self, publication, min_status).await
    }

    async fn downloaded_file(&self, scope: &str, name: &str) -> Result<Option<FileEntry>> {
        self.get_file(scope, name).await
    }

    async fn resource_version(&self) -> Result<Option<i64>> {
        Database::resource_version(self).await
    }

    async fn save_file(&self, scope: &str, file: &FileEntry) -> Result<()> {
        Database::save_file(self, scope, file).await
    }

    async fn update_issue_stub(&self, stub: &IssueStub) -> Result<bool> {
        Database::update_issue_stub(self, stub).await
    }

    async fn update_article_stub(&self, stub: &ArticleStub) -> Result<()> {
        self.save_article_state(stub).await
    }

    async fn delete_publication(&self, publication: &IssuePublication) -> Result<Vec<IssueKey>> {
        Database::delete_publication(self, publication).await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
