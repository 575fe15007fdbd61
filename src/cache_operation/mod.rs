//! Failure-aggregating join over a set of file transfers.
//!
//! A [`CacheOperation`] owns a fixed set of [`CacheItem`]s. Every item is
//! reported exactly once, as a success or a failure, from whichever task
//! handled it. The report that completes the set resolves the operation:
//! success if nothing failed, otherwise a [`CacheOperationFailed`] listing
//! every failed item.
//!
//! Items are identified by their destination path: two files with the same
//! name in different storage scopes are distinct items.
//!
//! Reporting an item twice, reporting an item the operation does not own, or
//! resolving an operation twice are protocol violations and panic.

mod item;

pub use item::{CacheItem, CacheOperationItem};

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::sync::{Notify, broadcast};

use crate::error::{CacheOperationFailed, FileFailure};
use crate::types::{DownloadPriority, Event};

/// Outcome of a resolved cache operation
pub type OperationOutcome = std::result::Result<(), CacheOperationFailed>;

/// A priority that can be raised after it was handed out
///
/// Clones share the same cell. The value only ever increases.
#[derive(Clone, Debug)]
pub struct SharedPriority(Arc<AtomicU8>);

impl SharedPriority {
    /// Create a cell holding `priority`
    pub fn new(priority: DownloadPriority) -> Self {
        Self(Arc::new(AtomicU8::new(priority.to_u8())))
    }

    /// Current priority
    pub fn get(&self) -> DownloadPriority {
        DownloadPriority::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Raise to `priority` if it is higher; returns the previous value
    pub fn raise(&self, priority: DownloadPriority) -> DownloadPriority {
        DownloadPriority::from_u8(self.0.fetch_max(priority.to_u8(), Ordering::AcqRel))
    }
}

impl Default for SharedPriority {
    fn default() -> Self {
        Self::new(DownloadPriority::default())
    }
}

#[derive(Default)]
struct NotifierState {
    reported: HashSet<PathBuf>,
    failures: Vec<FileFailure>,
}

/// Tracks completion of a set of cache items
pub struct CacheOperation {
    tag: String,
    items: Vec<CacheItem>,
    index: HashMap<PathBuf, usize>,
    priority: SharedPriority,
    completed: AtomicUsize,
    state: Mutex<NotifierState>,
    outcome: OnceLock<OperationOutcome>,
    resolved: Notify,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl std::fmt::Debug for CacheOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOperation")
            .field("tag", &self.tag)
            .field("total", &self.items.len())
            .field("priority", &self.priority())
            .field("completed", &self.completed())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl CacheOperation {
    /// Create an operation over `items` at normal priority
    ///
    /// Items with the same destination are collapsed (first one wins). An
    /// operation with no items is resolved as a success immediately.
    pub fn new(
        tag: impl Into<String>,
        items: impl IntoIterator<Item = CacheItem>,
        event_tx: Option<broadcast::Sender<Event>>,
    ) -> Arc<Self> {
        Self::with_priority(tag, items, event_tx, SharedPriority::default())
    }

    /// Create an operation whose transfers are scheduled at `priority`
    pub fn with_priority(
        tag: impl Into<String>,
        items: impl IntoIterator<Item = CacheItem>,
        event_tx: Option<broadcast::Sender<Event>>,
        priority: SharedPriority,
    ) -> Arc<Self> {
        let mut index = HashMap::new();
        let mut distinct = Vec::new();
        for item in items {
            if let Entry::Vacant(slot) = index.entry(item.key().to_path_buf()) {
                slot.insert(distinct.len());
                distinct.push(item);
            }
        }

        let operation = Arc::new(Self {
            tag: tag.into(),
            items: distinct,
            index,
            priority,
            completed: AtomicUsize::new(0),
            state: Mutex::new(NotifierState::default()),
            outcome: OnceLock::new(),
            resolved: Notify::new(),
            event_tx,
        });

        if operation.items.is_empty() {
            operation.resolve(Ok(()));
        }
        operation
    }

    /// Operation tag (used in logs and errors)
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The distinct items of this operation
    pub fn items(&self) -> &[CacheItem] {
        &self.items
    }

    /// Number of distinct items
    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Number of items reported so far
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    /// Scheduling priority of this operation's transfers
    pub fn priority(&self) -> DownloadPriority {
        self.priority.get()
    }

    /// Raise the scheduling priority if `priority` is higher
    pub fn raise_priority(&self, priority: DownloadPriority) {
        let previous = self.priority.raise(priority);
        if previous < priority {
            tracing::debug!(
                operation = %self.tag,
                from = ?previous,
                to = ?priority,
                "Raised cache operation priority"
            );
        }
    }

    /// Number of items reported as failed so far
    pub fn failure_count(&self) -> usize {
        self.lock_state().failures.len()
    }

    /// Whether the operation has resolved
    pub fn is_resolved(&self) -> bool {
        self.outcome.get().is_some()
    }

    /// The outcome, if resolved
    pub fn outcome(&self) -> Option<OperationOutcome> {
        self.outcome.get().cloned()
    }

    /// Items bound to this operation, for handing to a downloader
    pub fn operation_items(self: &Arc<Self>) -> Vec<CacheOperationItem> {
        self.items
            .iter()
            .map(|item| CacheOperationItem::new(item.clone(), self))
            .collect()
    }

    /// Report that the item written to `key` was materialized
    ///
    /// # Panics
    ///
    /// If the item is unknown or was already reported.
    pub fn notify_success(&self, key: &Path) {
        self.record(key, None);
    }

    /// Report that the item written to `key` failed
    ///
    /// # Panics
    ///
    /// If the item is unknown or was already reported.
    pub fn notify_failure(&self, key: &Path, reason: impl Into<String>) {
        self.record(key, Some(reason.into()));
    }

    /// Wait until every item has been reported
    pub async fn wait(&self) -> OperationOutcome {
        loop {
            let notified = self.resolved.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.outcome.get() {
                return outcome.clone();
            }
            notified.await;
        }
    }

    fn record(&self, key: &Path, failure: Option<String>) {
        let Some(&position) = self.index.get(key) else {
            panic!(
                "item {} is not part of cache operation {}",
                key.display(),
                self.tag
            );
        };
        let name = self.items[position].name();

        let failed = failure.is_some();
        {
            let mut state = self.lock_state();
            if !state.reported.insert(key.to_path_buf()) {
                drop(state);
                panic!(
                    "item {} reported twice to cache operation {}",
                    key.display(),
                    self.tag
                );
            }
            if let Some(reason) = failure {
                tracing::warn!(
                    operation = %self.tag,
                    file = %name,
                    reason = %reason,
                    "Cache item failed"
                );
                state.failures.push(FileFailure {
                    name: name.to_string(),
                    reason,
                });
            }
        }

        // The failure (if any) is recorded before the count is published, so
        // whoever observes the final count sees every failure.
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        let total = self.items.len();

        if let Some(tx) = &self.event_tx {
            tx.send(Event::ItemCompleted {
                tag: self.tag.clone(),
                name: name.to_string(),
                completed,
                total,
                failed,
            })
            .ok();
        }

        if completed == total {
            let failures = self.lock_state().failures.clone();
            let outcome = if failures.is_empty() {
                Ok(())
            } else {
                Err(CacheOperationFailed {
                    tag: self.tag.clone(),
                    total,
                    failures,
                })
            };
            self.resolve(outcome);
        }
    }

    fn resolve(&self, outcome: OperationOutcome) {
        match &outcome {
            Ok(()) => tracing::debug!(
                operation = %self.tag,
                total = self.items.len(),
                "Cache operation complete"
            ),
            Err(e) => tracing::warn!(
                operation = %self.tag,
                failed = e.failures.len(),
                total = e.total,
                "Cache operation failed"
            ),
        }
        if self.outcome.set(outcome).is_err() {
            panic!("cache operation {} resolved twice", self.tag);
        }
        self.resolved.notify_waiters();
    }

    fn lock_state(&self) -> MutexGuard<'_, NotifierState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
