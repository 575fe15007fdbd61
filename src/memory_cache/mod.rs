//! Bounded in-memory cache of fully materialized issues.
//!
//! Entries are kept in recency order (least recent at the front). A `get`
//! moves the hit to the back, an `add` replaces any entry with the same key,
//! appends, and evicts from the front while over capacity. All operations
//! run under one mutex and never hold it across an await.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;

use crate::types::{ArticleStub, Issue, IssueKey, IssuePublication, IssueStub};

/// Default number of issues kept in memory
pub const DEFAULT_CAPACITY: usize = 5;

/// LRU cache of [`Issue`]s keyed by [`IssueKey`]
#[derive(Debug)]
pub struct IssueInMemoryCache {
    capacity: usize,
    entries: Mutex<VecDeque<Arc<Issue>>>,
}

impl Default for IssueInMemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl IssueInMemoryCache {
    /// Create a cache holding at most `capacity` issues (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity + 1)),
        }
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached issues
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Cached keys, least recently used first
    pub fn keys(&self) -> Vec<IssueKey> {
        self.lock().iter().map(|issue| issue.key().clone()).collect()
    }

    /// Look up an issue and mark it most recently used
    pub fn get(&self, key: &IssueKey) -> Option<Arc<Issue>> {
        let mut entries = self.lock();
        let pos = entries.iter().position(|issue| issue.key() == key)?;
        let issue = entries.remove(pos)?;
        entries.push_back(issue.clone());
        Some(issue)
    }

    /// Look up an entry without changing its recency
    pub fn peek(&self, key: &IssueKey) -> Option<Arc<Issue>> {
        self.lock().iter().find(|issue| issue.key() == key).cloned()
    }

    /// Insert an issue as most recently used, replacing one with the same key
    pub fn add(&self, issue: Arc<Issue>) {
        let mut entries = self.lock();
        entries.retain(|cached| cached.key() != issue.key());
        entries.push_back(issue);
        while entries.len() > self.capacity {
            if let Some(evicted) = entries.pop_front() {
                tracing::debug!(issue = %evicted.key(), "Evicted issue from memory cache");
            }
        }
    }

    /// Remove the entry for `key`, if any
    pub fn invalidate(&self, key: &IssueKey) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|cached| cached.key() != key);
        before != entries.len()
    }

    /// Remove every variant of a publication
    pub fn invalidate_publication(&self, publication: &IssuePublication) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|cached| !cached.key().is_variant_of(publication));
        before - entries.len()
    }

    /// Remove every issue published on `date`, whatever its feed
    pub fn invalidate_by_date(&self, date: NaiveDate) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|cached| cached.key().date != date);
        before - entries.len()
    }

    /// Replace the stub of a cached issue, keeping its recency
    ///
    /// Returns `false` if the issue is not cached.
    pub fn update(&self, stub: &IssueStub) -> bool {
        let mut entries = self.lock();
        match entries.iter_mut().find(|cached| cached.key() == &stub.key) {
            Some(slot) => {
                *slot = Arc::new(slot.with_stub(stub.clone()));
                true
            }
            None => false,
        }
    }

    /// Patch an article in every cached variant of its publication
    ///
    /// Untouched sections and articles stay shared with the previous
    /// version. Returns the number of issues patched.
    pub fn update_article(&self, stub: &ArticleStub) -> usize {
        let publication = stub.publication();
        let mut entries = self.lock();
        let mut patched = 0;
        for slot in entries
            .iter_mut()
            .filter(|cached| cached.key().is_variant_of(&publication))
        {
            if let Some(issue) = slot.with_article(stub) {
                *slot = Arc::new(issue);
                patched += 1;
            }
        }
        patched
    }

    /// Remove everything
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<Issue>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
