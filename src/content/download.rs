//! The download pipeline.
//!
//! metadata -> resource check -> file planning -> transfer -> persist -> cache.
//! Nothing is persisted or cached unless every file arrived.
//!
//! Metadata-only and single-file downloads reuse the same stages.

use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache_operation::{CacheItem, CacheOperation, SharedPriority};
use crate::db::file_scope;
use crate::error::{Error, Result};
use crate::retry::with_retry;
use crate::types::{
    DownloadPriority, Event, FileEntry, Issue, IssueDescriptor, IssuePublication,
    ResourceDescriptor,
};

use super::{ContentService, DownloadOptions};

/// Files to transfer for one download
#[derive(Debug, Default)]
struct TransferPlan {
    items: Vec<CacheItem>,
    skipped: usize,
    destinations: HashSet<PathBuf>,
}

fn origin_url(base_url: &str, name: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), name)
}

impl ContentService {
    /// Fetch and store an issue's metadata without transferring its files
    ///
    /// With `allow_cache`, a cached or stored record (downloaded or not) is
    /// returned without contacting the server. The result is not added to
    /// the memory cache, which only holds fully downloaded issues.
    pub async fn download_metadata(
        &self,
        publication: &IssuePublication,
        options: DownloadOptions,
    ) -> Result<Arc<Issue>> {
        self.ensure_accepting()?;

        if options.allow_cache {
            if let Some(issue) = self.memory_peek(publication) {
                return Ok(issue);
            }
            if let Some(key) = self
                .repository
                .stored_key(publication, self.config.min_status)
                .await?
            {
                if let Some(issue) = self.repository.get(&key).await? {
                    tracing::debug!(issue = %key, "Loaded stored metadata");
                    return Ok(Arc::new(issue));
                }
            }
        }

        let descriptor = self.fetch_descriptor(publication).await?;
        self.repository.save_metadata(&descriptor).await?;
        let issue = self
            .repository
            .get(&descriptor.key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("issue {} after saving", descriptor.key)))?;

        tracing::info!(issue = %descriptor.key, "Stored issue metadata");
        Ok(Arc::new(issue))
    }

    /// Make sure a single file is on disk and return its path
    ///
    /// Nothing is transferred if a matching copy is already recorded and
    /// present. Otherwise the file is fetched through a one-item cache
    /// operation and recorded once it arrived.
    pub async fn download_file_if_missing(
        &self,
        file: &FileEntry,
        base_url: &str,
        publication: &IssuePublication,
        priority: DownloadPriority,
    ) -> Result<PathBuf> {
        self.ensure_accepting()?;

        let destination = self.layout.path_for(file, publication)?;
        let scope = file_scope(file.storage_type, publication);
        if self.is_current(&scope, file, &destination).await? {
            tracing::debug!(file = %file.name, scope = %scope, "File already present");
            return Ok(destination);
        }

        let item = CacheItem::new(
            file.clone(),
            origin_url(base_url, &file.name),
            destination.clone(),
        );
        let operation = CacheOperation::with_priority(
            format!("{scope}/{}", file.name),
            [item],
            Some(self.event_tx.clone()),
            SharedPriority::new(priority),
        );
        self.downloader.enqueue_download(&operation).await?;
        operation.wait().await?;

        self.repository.save_file(&scope, file).await?;
        tracing::debug!(file = %file.name, scope = %scope, "Downloaded single file");
        Ok(destination)
    }

    /// Download a publication end to end
    pub(super) async fn run_download(
        &self,
        publication: &IssuePublication,
        priority: SharedPriority,
    ) -> Result<Arc<Issue>> {
        self.emit_event(Event::DownloadStarted {
            publication: publication.clone(),
        });
        tracing::info!(publication = %publication, "Downloading issue");

        let result = self.download_files(publication, priority).await;
        match &result {
            Ok(issue) => {
                tracing::info!(issue = %issue.key(), "Issue cached");
                self.emit_event(Event::DownloadComplete {
                    key: issue.key().clone(),
                });
            }
            Err(e) => {
                let failed_files = match e {
                    Error::CacheOperationFailed(failure) => failure
                        .failed_names()
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                    _ => Vec::new(),
                };
                tracing::error!(
                    publication = %publication,
                    failed = failed_files.len(),
                    error = %e,
                    "Issue download failed"
                );
                self.emit_event(Event::DownloadFailed {
                    publication: publication.clone(),
                    failed_files,
                    error: e.to_string(),
                });
            }
        }
        result
    }

    async fn download_files(
        &self,
        publication: &IssuePublication,
        priority: SharedPriority,
    ) -> Result<Arc<Issue>> {
        let descriptor = self.fetch_descriptor(publication).await?;
        let resources = self.resources_needed(&descriptor).await?;

        let mut plan = TransferPlan::default();
        if let Some(resources) = &resources {
            for file in &resources.files {
                self.plan_file(&mut plan, file, &resources.base_url, publication)
                    .await?;
            }
        }
        for file in descriptor.files() {
            self.plan_file(&mut plan, file, &descriptor.base_url, publication)
                .await?;
        }

        let total = plan.items.len();
        tracing::debug!(
            issue = %descriptor.key,
            total,
            skipped = plan.skipped,
            priority = ?priority.get(),
            "Resolved files to download"
        );
        self.emit_event(Event::MetadataResolved {
            key: descriptor.key.clone(),
            total_files: total,
            skipped_files: plan.skipped,
        });

        let operation = CacheOperation::with_priority(
            descriptor.key.to_string(),
            plan.items,
            Some(self.event_tx.clone()),
            priority,
        );
        if total > 0 {
            self.downloader.enqueue_download(&operation).await?;
        }
        operation.wait().await?;

        self.persist(&descriptor, resources.as_ref()).await
    }

    /// Fetch, validate and check the descriptor served for `publication`
    async fn fetch_descriptor(&self, publication: &IssuePublication) -> Result<IssueDescriptor> {
        let descriptor = with_retry(&self.config.metadata_retry, || {
            self.api.fetch_issue_descriptor(publication)
        })
        .await?;
        descriptor.validate()?;

        if !descriptor.key.is_variant_of(publication) {
            return Err(Error::InvalidDescriptor(format!(
                "requested {} but received {}",
                publication, descriptor.key
            )));
        }
        if descriptor.key.status < self.config.min_status {
            return Err(Error::MinStatusNotMet {
                publication: publication.clone(),
                status: descriptor.key.status,
                min_status: self.config.min_status,
            });
        }
        Ok(descriptor)
    }

    /// Resource bundle to fetch alongside the issue, if the stored one is too old
    async fn resources_needed(
        &self,
        descriptor: &IssueDescriptor,
    ) -> Result<Option<ResourceDescriptor>> {
        let stored = self.repository.resource_version().await?;
        if stored.is_some_and(|v| v >= descriptor.min_resource_version) {
            return Ok(None);
        }

        let resources = with_retry(&self.config.metadata_retry, || {
            self.api.fetch_resource_descriptor()
        })
        .await?;
        if resources.version < descriptor.min_resource_version {
            return Err(Error::InvalidDescriptor(format!(
                "{} needs resources v{} but server offers v{}",
                descriptor.key, descriptor.min_resource_version, resources.version
            )));
        }
        tracing::debug!(
            stored = ?stored,
            version = resources.version,
            "Resource bundle update required"
        );
        Ok(Some(resources))
    }

    async fn plan_file(
        &self,
        plan: &mut TransferPlan,
        file: &FileEntry,
        base_url: &str,
        publication: &IssuePublication,
    ) -> Result<()> {
        let destination = self.layout.path_for(file, publication)?;
        if !plan.destinations.insert(destination.clone()) {
            return Ok(());
        }

        let scope = file_scope(file.storage_type, publication);
        if self.is_current(&scope, file, &destination).await? {
            plan.skipped += 1;
            return Ok(());
        }

        plan.items.push(CacheItem::new(
            file.clone(),
            origin_url(base_url, &file.name),
            destination,
        ));
        Ok(())
    }

    /// Whether a matching copy of the file is recorded and present on disk
    async fn is_current(&self, scope: &str, file: &FileEntry, destination: &Path) -> Result<bool> {
        let Some(stored) = self.repository.downloaded_file(scope, &file.name).await? else {
            return Ok(false);
        };
        if stored.sha256 != file.sha256 || stored.size != file.size {
            return Ok(false);
        }
        Ok(tokio::fs::metadata(destination)
            .await
            .is_ok_and(|meta| meta.is_file() && meta.len() == file.size))
    }

    async fn persist(
        &self,
        descriptor: &IssueDescriptor,
        resources: Option<&ResourceDescriptor>,
    ) -> Result<Arc<Issue>> {
        self.repository.save(descriptor, resources, Utc::now()).await?;

        let issue = self
            .repository
            .get(&descriptor.key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("issue {} after saving", descriptor.key)))?;
        let issue = Arc::new(issue);

        // A fresh download supersedes any other cached variant.
        self.memory_cache
            .invalidate_publication(&IssuePublication::from(&descriptor.key));
        self.memory_cache.add(issue.clone());
        Ok(issue)
    }
}
