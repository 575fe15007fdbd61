//! HTTP implementation of [`FileDownloader`].

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::{FileDownloader, part_path};
use crate::cache_operation::{CacheItem, CacheOperation, CacheOperationItem};
use crate::config::{DownloadConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::with_retry;
use crate::types::DownloadPriority;

/// One destination, queued or transferring
struct Transfer {
    item: CacheItem,
    /// Items reported with the outcome of this transfer
    waiters: Vec<CacheOperationItem>,
    /// Items for the same destination that expect different content
    deferred: Vec<CacheOperationItem>,
    running: bool,
    seq: u64,
}

impl Transfer {
    /// Highest priority among the operations waiting on this transfer
    fn priority(&self) -> DownloadPriority {
        self.waiters
            .iter()
            .map(CacheOperationItem::priority)
            .max()
            .unwrap_or(DownloadPriority::Low)
    }

    fn expects_same_content(&self, item: &CacheItem) -> bool {
        self.item.file.sha256 == item.file.sha256 && self.item.file.size == item.file.size
    }
}

/// Queue position of a waiting transfer
///
/// Higher priority first; equal priorities in arrival order.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct QueueRank {
    priority: DownloadPriority,
    seq: u64,
}

impl Ord for QueueRank {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.priority.cmp(&other.priority) {
            std::cmp::Ordering::Equal => other.seq.cmp(&self.seq),
            ordering => ordering,
        }
    }
}

impl PartialOrd for QueueRank {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct TransferQueue {
    transfers: HashMap<PathBuf, Transfer>,
    running: usize,
    next_seq: u64,
}

enum Admission {
    Queued,
    Joined,
    Deferred,
}

impl TransferQueue {
    fn admit(&mut self, op_item: CacheOperationItem) -> Admission {
        let destination = op_item.item().destination.clone();
        match self.transfers.get_mut(&destination) {
            Some(transfer) if transfer.expects_same_content(op_item.item()) => {
                transfer.waiters.push(op_item);
                Admission::Joined
            }
            Some(transfer) => {
                transfer.deferred.push(op_item);
                Admission::Deferred
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.transfers.insert(
                    destination,
                    Transfer {
                        item: op_item.item().clone(),
                        waiters: vec![op_item],
                        deferred: Vec::new(),
                        running: false,
                        seq,
                    },
                );
                Admission::Queued
            }
        }
    }

    /// Mark the best queued transfers as running, up to `limit` at once
    fn next_ready(&mut self, limit: usize) -> Vec<CacheItem> {
        let mut ready = Vec::new();
        while self.running < limit {
            let next = self
                .transfers
                .iter()
                .filter(|(_, transfer)| !transfer.running)
                .max_by_key(|(_, transfer)| QueueRank {
                    priority: transfer.priority(),
                    seq: transfer.seq,
                })
                .map(|(destination, _)| destination.clone());
            let Some(transfer) = next.and_then(|d| self.transfers.get_mut(&d)) else {
                break;
            };
            transfer.running = true;
            self.running += 1;
            ready.push(transfer.item.clone());
        }
        ready
    }
}

/// Downloads cache items over HTTP with bounded concurrency
///
/// Queued transfers start in priority order, read from the owning operations
/// when a slot frees up, so raising an operation's priority reorders its
/// pending files. Transfers for the same destination are shared: an item
/// enqueued while another operation is already fetching that file is
/// reported with the outcome of the running transfer instead of fetching it
/// twice. If the two items expect different content, the later one is
/// fetched again once the first transfer is done.
#[derive(Clone)]
pub struct HttpFileDownloader {
    client: reqwest::Client,
    config: Arc<DownloadConfig>,
    retry: Arc<RetryConfig>,
    queue: Arc<Mutex<TransferQueue>>,
    cancel_token: CancellationToken,
}

impl HttpFileDownloader {
    /// Create a downloader with its own HTTP client
    pub fn new(config: DownloadConfig, retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, config, retry))
    }

    /// Create a downloader that shares an existing HTTP client
    pub fn with_client(client: reqwest::Client, config: DownloadConfig, retry: RetryConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
            retry: Arc::new(retry),
            queue: Arc::new(Mutex::new(TransferQueue::default())),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Number of distinct files currently queued or transferring
    pub fn in_flight_count(&self) -> usize {
        self.lock_queue().transfers.len()
    }

    fn limit(&self) -> usize {
        self.config.max_simultaneous_downloads.max(1)
    }

    fn lock_queue(&self) -> MutexGuard<'_, TransferQueue> {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start as many queued transfers as the concurrency limit allows
    fn pump(&self) {
        let ready = self.lock_queue().next_ready(self.limit());
        for item in ready {
            self.spawn_transfer(item);
        }
    }

    fn spawn_transfer(&self, item: CacheItem) {
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = this.cancel_token.cancelled() => Err(Error::ShuttingDown),
                result = with_retry(&this.retry, || this.fetch_file(&item)) => result,
            };

            let (waiters, requeued) = {
                let mut queue = this.lock_queue();
                queue.running = queue.running.saturating_sub(1);
                let (waiters, deferred) = queue
                    .transfers
                    .remove(&item.destination)
                    .map(|transfer| (transfer.waiters, transfer.deferred))
                    .unwrap_or_default();
                let requeued = deferred.len();
                for op_item in deferred {
                    queue.admit(op_item);
                }
                (waiters, requeued)
            };

            if let Err(e) = &outcome {
                tracing::warn!(
                    file = %item.name(),
                    url = %item.origin,
                    waiters = waiters.len(),
                    error = %e,
                    "File download failed"
                );
            }
            if requeued > 0 {
                tracing::debug!(
                    file = %item.name(),
                    requeued,
                    "Fetching file again for items expecting other content"
                );
            }
            for waiter in waiters {
                waiter.notify(&outcome);
            }
            this.pump();
        });
    }

    async fn fetch_file(&self, item: &CacheItem) -> Result<()> {
        let part = part_path(&item.destination);
        let result = self.write_part(item, &part).await;
        match result {
            Ok(()) => {
                tokio::fs::rename(&part, &item.destination).await?;
                tracing::debug!(file = %item.name(), path = ?item.destination, "File downloaded");
                Ok(())
            }
            Err(e) => {
                tokio::fs::remove_file(&part).await.ok();
                Err(e)
            }
        }
    }

    async fn write_part(&self, item: &CacheItem, part: &std::path::Path) -> Result<()> {
        let mut response = self.client.get(&item.origin).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: item.origin.clone(),
            });
        }

        if let Some(parent) = item.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(part).await?;
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            hasher.update(&chunk);
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if self.config.verify_checksums {
            if size != item.file.size {
                return Err(Error::IntegrityMismatch {
                    name: item.name().to_string(),
                    expected: format!("{} bytes", item.file.size),
                    actual: format!("{size} bytes"),
                });
            }
            let digest = format!("{:x}", hasher.finalize());
            if !item.file.sha256.is_empty() && !digest.eq_ignore_ascii_case(&item.file.sha256) {
                return Err(Error::IntegrityMismatch {
                    name: item.name().to_string(),
                    expected: item.file.sha256.clone(),
                    actual: digest,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FileDownloader for HttpFileDownloader {
    async fn enqueue_download(&self, operation: &Arc<CacheOperation>) -> Result<()> {
        if self.cancel_token.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let (mut queued, mut joined, mut deferred) = (0, 0, 0);
        {
            let mut queue = self.lock_queue();
            for op_item in operation.operation_items() {
                match queue.admit(op_item) {
                    Admission::Queued => queued += 1,
                    Admission::Joined => joined += 1,
                    Admission::Deferred => deferred += 1,
                }
            }
        }
        self.pump();

        tracing::debug!(
            operation = %operation.tag(),
            priority = ?operation.priority(),
            queued,
            joined,
            deferred,
            "Enqueued cache operation"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }

    async fn shutdown(&self) {
        tracing::info!("Cancelling file transfers");
        self.cancel_token.cancel();

        // Running transfers observe the token; queued ones never start.
        let pending: Vec<CacheOperationItem> = {
            let mut queue = self.lock_queue();
            let idle: Vec<PathBuf> = queue
                .transfers
                .iter()
                .filter(|(_, transfer)| !transfer.running)
                .map(|(destination, _)| destination.clone())
                .collect();
            idle.iter()
                .filter_map(|destination| queue.transfers.remove(destination))
                .flat_map(|transfer| transfer.waiters.into_iter().chain(transfer.deferred))
                .collect()
        };

        let outcome: Result<()> = Err(Error::ShuttingDown);
        for op_item in pending {
            op_item.notify(&outcome);
        }
    }
}
