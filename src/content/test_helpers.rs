//! Test doubles and fixtures for the content service.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use crate::cache_operation::CacheOperation;
use crate::config::{Config, RetryConfig};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::file_downloader::FileDownloader;
use crate::metadata::MetadataApi;
use crate::types::{
    ArticleDescriptor, DownloadPriority, FileEntry, IssueDescriptor, IssueKey, IssuePublication, IssueStatus,
    ResourceDescriptor, SectionDescriptor, StorageType,
};

use super::ContentService;

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

pub fn publication() -> IssuePublication {
    IssuePublication::new("taz", date())
}

pub fn file(name: &str, storage_type: StorageType) -> FileEntry {
    FileEntry {
        name: name.to_string(),
        storage_type,
        sha256: format!("{:064x}", name.len()),
        size: name.len() as u64,
        moment: 1_714_521_600_000,
    }
}

/// Issue with a cover, one section with two articles, six files in total
pub fn descriptor(status: IssueStatus) -> IssueDescriptor {
    IssueDescriptor {
        key: publication().with_status(status),
        base_url: "https://cdn.example.com/taz/2024-05-01".to_string(),
        min_resource_version: 1,
        moment: vec![file("moment.jpg", StorageType::Issue)],
        sections: vec![SectionDescriptor {
            key: "seite1".to_string(),
            title: "Seite 1".to_string(),
            extended_title: None,
            html: file("seite1.html", StorageType::Issue),
            images: vec![file("logo.png", StorageType::Global)],
            articles: vec![
                ArticleDescriptor {
                    key: "art1".to_string(),
                    title: Some("First".to_string()),
                    teaser: None,
                    authors: vec!["A. Author".to_string()],
                    html: file("art1.html", StorageType::Issue),
                    images: vec![file("art1.jpg", StorageType::Issue)],
                },
                ArticleDescriptor {
                    key: "art2".to_string(),
                    title: Some("Second".to_string()),
                    teaser: None,
                    authors: Vec::new(),
                    html: file("art2.html", StorageType::Issue),
                    images: Vec::new(),
                },
            ],
        }],
    }
}

pub fn resources(version: i64) -> ResourceDescriptor {
    ResourceDescriptor {
        version,
        base_url: "https://cdn.example.com/resources".to_string(),
        files: vec![
            file("tazApi.css", StorageType::Global),
            file("tazApi.js", StorageType::Global),
        ],
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().join("data");
    config.persistence.database_path = dir.path().join("issue-cache.db");
    config.metadata_retry = fast_retry(2);
    config.file_retry = fast_retry(0);
    config
}

/// Metadata API serving fixed descriptors
pub struct StaticMetadataApi {
    pub descriptor: Mutex<IssueDescriptor>,
    pub resources: Mutex<ResourceDescriptor>,
    /// Number of issue requests that fail with a connectivity error first
    pub failures_before_success: AtomicUsize,
    pub issue_calls: AtomicUsize,
    pub resource_calls: AtomicUsize,
    pub delay: Duration,
}

impl StaticMetadataApi {
    pub fn new(descriptor: IssueDescriptor) -> Self {
        Self {
            descriptor: Mutex::new(descriptor),
            resources: Mutex::new(resources(1)),
            failures_before_success: AtomicUsize::new(0),
            issue_calls: AtomicUsize::new(0),
            resource_calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn issue_calls(&self) -> usize {
        self.issue_calls.load(Ordering::SeqCst)
    }

    pub fn resource_calls(&self) -> usize {
        self.resource_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataApi for StaticMetadataApi {
    async fn fetch_issue_descriptor(
        &self,
        publication: &IssuePublication,
    ) -> Result<IssueDescriptor> {
        self.issue_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let remaining = self.failures_before_success.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_before_success
                .store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Connectivity(format!("{publication} unreachable")));
        }
        Ok(self.descriptor.lock().unwrap().clone())
    }

    async fn fetch_resource_descriptor(&self) -> Result<ResourceDescriptor> {
        self.resource_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.resources.lock().unwrap().clone())
    }
}

/// Downloader that reports scripted outcomes
///
/// Successful items are written to their destination with `size` bytes so
/// that later downloads can recognize them as present.
#[derive(Default)]
pub struct ScriptedFileDownloader {
    failing: Mutex<HashSet<String>>,
    fail_all: bool,
    enqueued: Mutex<Vec<String>>,
    priorities: Mutex<Vec<DownloadPriority>>,
    operations: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl ScriptedFileDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: Mutex::new(names.iter().map(|n| n.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn failing_all() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn enqueued(&self) -> Vec<String> {
        self.enqueued.lock().unwrap().clone()
    }

    /// Priority of each enqueued operation, in enqueue order
    pub fn priorities(&self) -> Vec<DownloadPriority> {
        self.priorities.lock().unwrap().clone()
    }

    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileDownloader for ScriptedFileDownloader {
    async fn enqueue_download(&self, operation: &Arc<CacheOperation>) -> Result<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.priorities.lock().unwrap().push(operation.priority());
        let failing = self.failing.lock().unwrap().clone();

        for op_item in operation.operation_items() {
            let item = op_item.item().clone();
            self.enqueued.lock().unwrap().push(item.name().to_string());
            let fail = self.fail_all || failing.contains(item.name());

            tokio::spawn(async move {
                if fail {
                    op_item.notify_failure("scripted failure");
                    return;
                }
                if let Some(parent) = item.destination.parent() {
                    tokio::fs::create_dir_all(parent).await.unwrap();
                }
                tokio::fs::write(&item.destination, vec![b'x'; item.file.size as usize])
                    .await
                    .unwrap();
                op_item.notify_success();
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Service over a real database in a temp dir and the given doubles
pub async fn service(
    dir: &TempDir,
    api: Arc<StaticMetadataApi>,
    downloader: Arc<ScriptedFileDownloader>,
) -> ContentService {
    service_with(test_config(dir), api, downloader).await
}

pub async fn service_with(
    config: Config,
    api: Arc<StaticMetadataApi>,
    downloader: Arc<ScriptedFileDownloader>,
) -> ContentService {
    let db = Database::new(&config.persistence.database_path)
        .await
        .unwrap();
    ContentService::with_components(config, api, Arc::new(db), downloader)
}

pub fn key(status: IssueStatus) -> IssueKey {
    publication().with_status(status)
}
