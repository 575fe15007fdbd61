//! Content service: materializes issues into the local cache.
//!
//! The `ContentService` struct and its methods are organized by concern:
//! - this module: construction, lookups, stub updates, deletion, lifecycle
//! - `download`: the download pipeline (metadata, file planning, transfer, persist)
//! - `layout`: where files live on disk
//!
//! A request for a publication is answered from the memory cache, then from
//! the repository, and only then downloaded. Concurrent requests for the same
//! publication share one download; a request with a higher priority raises
//! the priority of the download it joins.

mod download;
mod layout;

pub use layout::StorageLayout;

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast};

use crate::cache_operation::SharedPriority;
use crate::config::Config;
use crate::db::{Database, IssueRepository};
use crate::error::{Error, Result};
use crate::file_downloader::{FileDownloader, HttpFileDownloader};
use crate::memory_cache::IssueInMemoryCache;
use crate::metadata::{HttpMetadataApi, MetadataApi};
use crate::types::{
    ArticleStub, DownloadPriority, Event, Issue, IssueKey, IssuePublication, IssueStatus,
    IssueStub,
};

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

type SharedDownload = Shared<BoxFuture<'static, Result<Arc<Issue>>>>;

/// A running download and the priority its transfers are scheduled at
struct InFlightDownload {
    download: SharedDownload,
    priority: SharedPriority,
}

/// Options for a single download request
#[derive(Clone, Copy, Debug)]
pub struct DownloadOptions {
    /// Answer from the memory cache or repository if possible (default: true)
    ///
    /// `false` forces a fresh download.
    pub allow_cache: bool,
    /// Scheduling priority of the file transfers (default: normal)
    pub priority: DownloadPriority,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            allow_cache: true,
            priority: DownloadPriority::Normal,
        }
    }
}

/// Orchestrates metadata retrieval, file transfers, persistence and caching
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ContentService {
    config: Arc<Config>,
    layout: StorageLayout,
    api: Arc<dyn MetadataApi>,
    repository: Arc<dyn IssueRepository>,
    downloader: Arc<dyn FileDownloader>,
    memory_cache: Arc<IssueInMemoryCache>,
    in_flight: Arc<Mutex<HashMap<IssuePublication, InFlightDownload>>>,
    event_tx: broadcast::Sender<Event>,
    accepting_new: Arc<AtomicBool>,
}

impl ContentService {
    /// Create a service with the production HTTP and SQLite components
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Database::new(&config.persistence.database_path).await?;
        let client = reqwest::Client::builder()
            .timeout(config.download.request_timeout)
            .build()?;
        let api = HttpMetadataApi::new(&config.api, client.clone());
        let downloader = HttpFileDownloader::with_client(
            client,
            config.download.clone(),
            config.file_retry.clone(),
        );

        tracing::info!(
            data_dir = ?config.storage.data_dir,
            database = ?config.persistence.database_path,
            api = %config.api.base_url,
            "Content service initialized"
        );

        Ok(Self::with_components(
            config,
            Arc::new(api),
            Arc::new(db),
            Arc::new(downloader),
        ))
    }

    /// Create a service from explicit collaborators
    pub fn with_components(
        config: Config,
        api: Arc<dyn MetadataApi>,
        repository: Arc<dyn IssueRepository>,
        downloader: Arc<dyn FileDownloader>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            layout: StorageLayout::new(config.storage.data_dir.clone()),
            memory_cache: Arc::new(IssueInMemoryCache::new(config.memory_cache.capacity)),
            config: Arc::new(config),
            api,
            repository,
            downloader,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
            accepting_new: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Ensure a publication is fully cached and return it
    ///
    /// Returns the most valuable variant available that satisfies the
    /// configured minimum status. On failure nothing is persisted or cached.
    pub async fn download_to_cache(&self, publication: &IssuePublication) -> Result<Arc<Issue>> {
        self.download_to_cache_with(publication, DownloadOptions::default())
            .await
    }

    /// [`download_to_cache`](Self::download_to_cache) with explicit options
    ///
    /// Joining a running download raises its priority to `options.priority`
    /// if that is higher.
    pub async fn download_to_cache_with(
        &self,
        publication: &IssuePublication,
        options: DownloadOptions,
    ) -> Result<Arc<Issue>> {
        self.ensure_accepting()?;

        if options.allow_cache {
            if let Some(issue) = self.memory_get(publication) {
                tracing::debug!(issue = %issue.key(), "Memory cache hit");
                return Ok(issue);
            }
            if let Some(issue) = self.load_stored(publication).await? {
                tracing::debug!(issue = %issue.key(), "Loaded issue from repository");
                return Ok(issue);
            }
        }

        let download = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(publication) {
                Some(existing) => {
                    let previous = existing.priority.raise(options.priority);
                    tracing::debug!(
                        publication = %publication,
                        priority = ?previous.max(options.priority),
                        "Joining in-flight download"
                    );
                    existing.download.clone()
                }
                None => {
                    // A download may have finished between the lookups above
                    // and taking the lock.
                    if options.allow_cache {
                        if let Some(issue) = self.memory_get(publication) {
                            return Ok(issue);
                        }
                    }
                    let priority = SharedPriority::new(options.priority);
                    let download = self.spawn_download(publication.clone(), priority.clone());
                    in_flight.insert(
                        publication.clone(),
                        InFlightDownload {
                            download: download.clone(),
                            priority,
                        },
                    );
                    download
                }
            }
        };

        download.await
    }

    /// Download a specific variant
    ///
    /// Fails with [`Error::UnexpectedIssueKey`] if the server (or cache)
    /// provides a different variant than requested.
    pub async fn download_issue(&self, key: &IssueKey) -> Result<Arc<Issue>> {
        let issue = self.download_to_cache(&IssuePublication::from(key)).await?;
        if issue.key() != key {
            return Err(Error::UnexpectedIssueKey {
                expected: key.clone(),
                actual: issue.key().clone(),
            });
        }
        Ok(issue)
    }

    /// Whether a variant satisfying the minimum status is available offline
    pub async fn is_present(&self, publication: &IssuePublication) -> Result<bool> {
        Ok(self.get_issue_key(publication).await?.is_some())
    }

    /// Most valuable variant available offline
    ///
    /// Does not change the recency of cached issues.
    pub async fn get_issue_key(&self, publication: &IssuePublication) -> Result<Option<IssueKey>> {
        if let Some(issue) = self.memory_peek(publication) {
            return Ok(Some(issue.key().clone()));
        }
        self.repository
            .most_valuable_key(publication, self.config.min_status)
            .await
    }

    /// Persist changed issue metadata and patch the memory cache
    pub async fn update_issue_metadata(&self, stub: IssueStub) -> Result<()> {
        if !self.repository.update_issue_stub(&stub).await? {
            return Err(Error::NotFound(format!("issue {}", stub.key)));
        }
        self.memory_cache.update(&stub);
        Ok(())
    }

    /// Persist an article's reading state and patch every cached variant
    pub async fn update_article(&self, stub: ArticleStub) -> Result<()> {
        self.repository.update_article_stub(&stub).await?;
        let patched = self.memory_cache.update_article(&stub);
        tracing::debug!(article = %stub.key, patched, "Updated article");
        Ok(())
    }

    /// Remove every variant of a publication from disk, repository and memory
    pub async fn delete_issue(&self, publication: &IssuePublication) -> Result<()> {
        let removed = self.repository.delete_publication(publication).await?;
        self.memory_cache.invalidate_publication(publication);

        let dir = self.layout.issue_dir(publication);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(publication = %publication, variants = removed.len(), "Deleted issue");
        Ok(())
    }

    /// Subscribe to download events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The in-memory issue cache
    pub fn memory_cache(&self) -> &IssueInMemoryCache {
        &self.memory_cache
    }

    /// The file layout under the data directory
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Stop accepting downloads and cancel running transfers
    pub async fn shutdown(&self) -> Result<()> {
        self.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new downloads");
        self.downloader.shutdown().await;
        tracing::info!(downloader = self.downloader.name(), "Content service shut down");
        Ok(())
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.accepting_new.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }

    /// Statuses acceptable for this service, most valuable first
    fn acceptable_statuses(&self) -> impl Iterator<Item = IssueStatus> + '_ {
        IssueStatus::DESCENDING
            .into_iter()
            .filter(|status| *status >= self.config.min_status)
    }

    /// Best cached variant; marks it as recently used
    fn memory_get(&self, publication: &IssuePublication) -> Option<Arc<Issue>> {
        self.acceptable_statuses()
            .find_map(|status| self.memory_cache.get(&publication.with_status(status)))
    }

    /// Best cached variant, leaving recency untouched
    fn memory_peek(&self, publication: &IssuePublication) -> Option<Arc<Issue>> {
        self.acceptable_statuses()
            .find_map(|status| self.memory_cache.peek(&publication.with_status(status)))
    }

    async fn load_stored(&self, publication: &IssuePublication) -> Result<Option<Arc<Issue>>> {
        let Some(key) = self
            .repository
            .most_valuable_key(publication, self.config.min_status)
            .await?
        else {
            return Ok(None);
        };
        if !self.repository.is_downloaded(&key).await? {
            return Ok(None);
        }
        let Some(issue) = self.repository.get(&key).await? else {
            return Ok(None);
        };

        let issue = Arc::new(issue);
        self.memory_cache.add(issue.clone());
        Ok(Some(issue))
    }

    /// Start a download in its own task
    ///
    /// The task removes the dedup entry itself, so the entry is cleared even
    /// if every caller stops waiting.
    fn spawn_download(
        &self,
        publication: IssuePublication,
        priority: SharedPriority,
    ) -> SharedDownload {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let result = AssertUnwindSafe(this.run_download(&publication, priority))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(Error::Other(format!("download of {publication} panicked")))
                });
            this.in_flight.lock().await.remove(&publication);
            result
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(Error::Other(format!("download task failed: {e}"))))
        }
        .boxed()
        .shared()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
