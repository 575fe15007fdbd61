//! Items tracked by a cache operation.

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use super::CacheOperation;
use crate::error::Result;
use crate::types::{DownloadPriority, FileEntry};

/// One remote file to materialize locally
///
/// Equality and hashing use the destination only.
#[derive(Clone, Debug)]
pub struct CacheItem {
    /// File metadata (name, hash, size)
    pub file: FileEntry,
    /// URL the file is fetched from
    pub origin: String,
    /// Absolute path the file is written to
    pub destination: PathBuf,
}

impl CacheItem {
    /// Create a new cache item
    pub fn new(file: FileEntry, origin: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            file,
            origin: origin.into(),
            destination: destination.into(),
        }
    }

    /// The file name
    pub fn name(&self) -> &str {
        &self.file.name
    }

    /// The item's identity within an operation
    pub fn key(&self) -> &Path {
        &self.destination
    }
}

impl PartialEq for CacheItem {
    fn eq(&self, other: &Self) -> bool {
        self.destination == other.destination
    }
}

impl Eq for CacheItem {}

impl Hash for CacheItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.destination.hash(state);
    }
}

/// A [`CacheItem`] bound to the operation it reports into
///
/// The back-reference is weak: if the operation was dropped (its caller went
/// away), notifications become no-ops.
#[derive(Clone, Debug)]
pub struct CacheOperationItem {
    item: CacheItem,
    operation: Weak<CacheOperation>,
}

impl CacheOperationItem {
    pub(super) fn new(item: CacheItem, operation: &Arc<CacheOperation>) -> Self {
        Self {
            item,
            operation: Arc::downgrade(operation),
        }
    }

    /// The wrapped item
    pub fn item(&self) -> &CacheItem {
        &self.item
    }

    /// Tag of the owning operation, if it is still alive
    pub fn operation_tag(&self) -> Option<String> {
        self.operation.upgrade().map(|op| op.tag().to_string())
    }

    /// Priority of the owning operation; `Low` once it was dropped
    pub fn priority(&self) -> DownloadPriority {
        self.operation
            .upgrade()
            .map_or(DownloadPriority::Low, |op| op.priority())
    }

    /// Whether the owning operation has been dropped
    pub fn is_orphaned(&self) -> bool {
        self.operation.strong_count() == 0
    }

    /// Report that the file was materialized
    pub fn notify_success(&self) {
        if let Some(operation) = self.operation.upgrade() {
            operation.notify_success(self.item.key());
        }
    }

    /// Report that the file could not be materialized
    pub fn notify_failure(&self, reason: impl Into<String>) {
        if let Some(operation) = self.operation.upgrade() {
            operation.notify_failure(self.item.key(), reason);
        }
    }

    /// Report an outcome computed elsewhere
    pub fn notify(&self, outcome: &Result<()>) {
        match outcome {
            Ok(()) => self.notify_success(),
            Err(e) => self.notify_failure(e.to_string()),
        }
    }
}
