//! Issue metadata, stubs, reading state and deletion.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::DatabaseError;
use crate::types::{
    Article, ArticleStub, Issue, IssueDescriptor, IssueKey, IssuePublication, IssueStatus,
    IssueStub, ResourceDescriptor, Section,
};
use crate::{Error, Result};

use super::{ArticleStateRecord, Database, IssueRecord, file_scope};

impl Database {
    /// Persist a downloaded issue and record every file it consists of
    ///
    /// Replaces a previous record of the same variant but keeps its
    /// `last_displayable`.
    pub async fn save_issue(
        &self,
        descriptor: &IssueDescriptor,
        downloaded_at: DateTime<Utc>,
    ) -> Result<()> {
        self.save_download(descriptor, None, downloaded_at).await
    }

    /// Persist a completed download in one transaction
    ///
    /// Writes the resource bundle fetched alongside the issue (if any), the
    /// issue record and every file record. Either all of it is stored or
    /// none of it.
    pub async fn save_download(
        &self,
        descriptor: &IssueDescriptor,
        resources: Option<&ResourceDescriptor>,
        downloaded_at: DateTime<Utc>,
    ) -> Result<()> {
        descriptor.validate()?;
        let key = &descriptor.key;
        let json = serde_json::to_string(descriptor)?;
        let publication = IssuePublication::from(key);

        let mut tx = self.pool.begin().await?;

        if let Some(resources) = resources {
            Self::write_resources(&mut *tx, resources).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO issues (
                feed, date, status, base_url, min_resource_version,
                descriptor, downloaded_at, last_displayable
            ) VALUES (?, ?, ?, ?, ?, ?, ?, NULL)
            ON CONFLICT(feed, date, status) DO UPDATE SET
                base_url = excluded.base_url,
                min_resource_version = excluded.min_resource_version,
                descriptor = excluded.descriptor,
                downloaded_at = excluded.downloaded_at
            "#,
        )
        .bind(&key.feed)
        .bind(key.date.to_string())
        .bind(key.status.to_i32())
        .bind(&descriptor.base_url)
        .bind(descriptor.min_resource_version)
        .bind(&json)
        .bind(downloaded_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save issue {}: {}",
                key, e
            )))
        })?;

        for file in descriptor.files() {
            Self::upsert_file(&mut *tx, &file_scope(file.storage_type, &publication), file)
                .await?;
        }

        tx.commit().await?;
        tracing::debug!(
            issue = %key,
            resources = ?resources.map(|r| r.version),
            "Saved issue"
        );
        Ok(())
    }

    /// Persist issue metadata without marking any file as present
    ///
    /// A variant that was already downloaded is left untouched.
    pub async fn save_metadata(&self, descriptor: &IssueDescriptor) -> Result<()> {
        descriptor.validate()?;
        let key = &descriptor.key;
        let json = serde_json::to_string(descriptor)?;

        sqlx::query(
            r#"
            INSERT INTO issues (
                feed, date, status, base_url, min_resource_version,
                descriptor, downloaded_at, last_displayable
            ) VALUES (?, ?, ?, ?, ?, ?, NULL, NULL)
            ON CONFLICT(feed, date, status) DO UPDATE SET
                base_url = excluded.base_url,
                min_resource_version = excluded.min_resource_version,
                descriptor = excluded.descriptor
            WHERE issues.downloaded_at IS NULL
            "#,
        )
        .bind(&key.feed)
        .bind(key.date.to_string())
        .bind(key.status.to_i32())
        .bind(&descriptor.base_url)
        .bind(descriptor.min_resource_version)
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save metadata of {}: {}",
                key, e
            )))
        })?;

        tracing::debug!(issue = %key, "Saved issue metadata");
        Ok(())
    }

    /// Whether the variant was fully downloaded
    pub async fn is_downloaded(&self, key: &IssueKey) -> Result<bool> {
        let downloaded: Option<Option<i64>> = sqlx::query_scalar(
            "SELECT downloaded_at FROM issues WHERE feed = ? AND date = ? AND status = ?",
        )
        .bind(&key.feed)
        .bind(key.date.to_string())
        .bind(key.status.to_i32())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to check issue {}: {}",
                key, e
            )))
        })?;

        Ok(matches!(downloaded, Some(Some(_))))
    }

    /// Load a stored issue and overlay its articles' reading state
    pub async fn get_issue(&self, key: &IssueKey) -> Result<Option<Issue>> {
        let record: Option<IssueRecord> = sqlx::query_as(
            r#"
            SELECT feed, date, status, base_url, min_resource_version,
                   descriptor, downloaded_at, last_displayable
            FROM issues
            WHERE feed = ? AND date = ? AND status = ?
            "#,
        )
        .bind(&key.feed)
        .bind(key.date.to_string())
        .bind(key.status.to_i32())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to load issue {}: {}",
                key, e
            )))
        })?;

        let Some(record) = record else {
            return Ok(None);
        };

        let descriptor: IssueDescriptor = serde_json::from_str(&record.descriptor)?;
        let downloaded_at = record
            .downloaded_at
            .and_then(DateTime::<Utc>::from_timestamp_millis);
        let mut issue = Issue::from_descriptor(&descriptor, downloaded_at)?;
        issue.stub.last_displayable = record.last_displayable;

        let states = self.article_states(&IssuePublication::from(key)).await?;
        if !states.is_empty() {
            issue = overlay_article_states(issue, &states);
        }
        Ok(Some(issue))
    }

    /// Most valuable downloaded variant of a publication
    pub async fn most_valuable_key(
        &self,
        publication: &IssuePublication,
        min_status: IssueStatus,
    ) -> Result<Option<IssueKey>> {
        self.best_variant(publication, min_status, true).await
    }

    /// Most valuable stored variant, downloaded or metadata only
    pub async fn stored_key(
        &self,
        publication: &IssuePublication,
        min_status: IssueStatus,
    ) -> Result<Option<IssueKey>> {
        self.best_variant(publication, min_status, false).await
    }

    async fn best_variant(
        &self,
        publication: &IssuePublication,
        min_status: IssueStatus,
        downloaded_only: bool,
    ) -> Result<Option<IssueKey>> {
        let status: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT status FROM issues
            WHERE feed = ? AND date = ? AND status >= ?
              AND (downloaded_at IS NOT NULL OR NOT ?)
            ORDER BY status DESC
            LIMIT 1
            "#,
        )
        .bind(&publication.feed)
        .bind(publication.date.to_string())
        .bind(min_status.to_i32())
        .bind(downloaded_only)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to query variants of {}: {}",
                publication, e
            )))
        })?;

        status
            .map(|s| {
                IssueStatus::from_i32(s)
                    .map(|status| publication.with_status(status))
                    .ok_or_else(|| {
                        Error::Database(DatabaseError::CorruptRecord(format!(
                            "unknown issue status {s}"
                        )))
                    })
            })
            .transpose()
    }

    /// Update the mutable fields of a stored issue
    ///
    /// Returns `false` if the variant is not stored.
    pub async fn update_issue_stub(&self, stub: &IssueStub) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE issues
            SET base_url = ?, min_resource_version = ?, downloaded_at = ?, last_displayable = ?
            WHERE feed = ? AND date = ? AND status = ?
            "#,
        )
        .bind(&stub.base_url)
        .bind(stub.min_resource_version)
        .bind(stub.downloaded_at.map(|t| t.timestamp_millis()))
        .bind(&stub.last_displayable)
        .bind(&stub.key.feed)
        .bind(stub.key.date.to_string())
        .bind(stub.key.status.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update issue {}: {}",
                stub.key, e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist an article's reading state
    ///
    /// State is stored per publication, so every variant sees it.
    pub async fn save_article_state(&self, stub: &ArticleStub) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO article_state (
                feed, date, article_key, bookmarked, read_percentage, read_position
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(feed, date, article_key) DO UPDATE SET
                bookmarked = excluded.bookmarked,
                read_percentage = excluded.read_percentage,
                read_position = excluded.read_position
            "#,
        )
        .bind(&stub.issue_feed)
        .bind(stub.issue_date.to_string())
        .bind(&stub.key)
        .bind(stub.bookmarked)
        .bind(i64::from(stub.read_percentage))
        .bind(&stub.read_position)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save article state {}: {}",
                stub.key, e
            )))
        })?;

        Ok(())
    }

    /// Reading state of every article of a publication, keyed by article key
    pub async fn article_states(
        &self,
        publication: &IssuePublication,
    ) -> Result<HashMap<String, ArticleStateRecord>> {
        let rows: Vec<ArticleStateRecord> = sqlx::query_as(
            r#"
            SELECT article_key, bookmarked, read_percentage, read_position
            FROM article_state
            WHERE feed = ? AND date = ?
            "#,
        )
        .bind(&publication.feed)
        .bind(publication.date.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to load article state for {}: {}",
                publication, e
            )))
        })?;

        Ok(rows
            .into_iter()
            .map(|row| (row.article_key.clone(), row))
            .collect())
    }

    /// Remove every variant of a publication with its file records and state
    pub async fn delete_publication(
        &self,
        publication: &IssuePublication,
    ) -> Result<Vec<IssueKey>> {
        let date = publication.date.to_string();
        let mut tx = self.pool.begin().await?;

        let statuses: Vec<i32> =
            sqlx::query_scalar("SELECT status FROM issues WHERE feed = ? AND date = ?")
                .bind(&publication.feed)
                .bind(&date)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM issues WHERE feed = ? AND date = ?")
            .bind(&publication.feed)
            .bind(&date)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM article_state WHERE feed = ? AND date = ?")
            .bind(&publication.feed)
            .bind(&date)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM downloaded_files WHERE scope = ?")
            .bind(publication.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(statuses
            .into_iter()
            .filter_map(IssueStatus::from_i32)
            .map(|status| publication.with_status(status))
            .collect())
    }
}

fn overlay_article_states(issue: Issue, states: &HashMap<String, ArticleStateRecord>) -> Issue {
    let sections = issue
        .sections
        .iter()
        .map(|section| {
            let touched = section
                .articles
                .iter()
                .any(|a| states.contains_key(&a.stub.key));
            if !touched {
                return section.clone();
            }
            let articles = section
                .articles
                .iter()
                .map(|article| match states.get(&article.stub.key) {
                    Some(state) => Arc::new(Article {
                        stub: ArticleStub {
                            bookmarked: state.bookmarked,
                            read_percentage: state.read_percentage.clamp(0, 100) as u8,
                            read_position: state.read_position.clone(),
                            ..article.stub.clone()
                        },
                        html: article.html.clone(),
                        images: article.images.clone(),
                    }),
                    None => article.clone(),
                })
                .collect();
            Arc::new(Section {
                articles,
                ..(**section).clone()
            })
        })
        .collect();

    Issue { sections, ..issue }
}
