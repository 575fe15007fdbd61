//! File transfer seam.
//!
//! A [`FileDownloader`] receives a [`CacheOperation`], schedules every one of
//! its items and returns. Each item is later reported into the operation
//! exactly once, from whatever task performed the transfer.
//!
//! [`HttpFileDownloader`] is the production implementation. Tests substitute
//! doubles that report arbitrary per-item outcomes.

mod http;

pub use http::HttpFileDownloader;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache_operation::CacheOperation;
use crate::error::Result;

/// Trait for materializing the items of a cache operation
///
/// # Examples
///
/// ```no_run
/// use issue_cache::cache_operation::CacheOperation;
/// use issue_cache::file_downloader::{FileDownloader, HttpFileDownloader};
/// use issue_cache::config::{DownloadConfig, RetryConfig};
///
/// # async fn example() -> issue_cache::Result<()> {
/// let downloader = HttpFileDownloader::new(DownloadConfig::default(), RetryConfig::default())?;
/// let operation = CacheOperation::new("resources", vec![], None);
/// downloader.enqueue_download(&operation).await?;
/// operation.wait().await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait FileDownloader: Send + Sync {
    /// Schedule every item of `operation`
    ///
    /// Returns once the items are scheduled, not when they finish. Each item
    /// must eventually be reported to the operation exactly once.
    async fn enqueue_download(&self, operation: &Arc<CacheOperation>) -> Result<()>;

    /// Name of this implementation (for logging)
    fn name(&self) -> &str;

    /// Cancel queued and running transfers
    ///
    /// Items whose transfer is cancelled are reported as failed.
    async fn shutdown(&self) {}
}

/// Path of the temporary file a transfer writes before renaming into place
pub(crate) fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}
