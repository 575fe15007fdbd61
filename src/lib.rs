//! # issue-cache
//!
//! Content cache and download orchestration for a digital newspaper reader.
//!
//! An issue is a dated publication of a feed, available in several variants
//! (public, demo, regular). Making an issue readable offline means fetching
//! its metadata, transferring every file it consists of, persisting the
//! result and keeping recently used issues in memory.
//!
//! ## Design
//!
//! - **All or nothing** - an issue is stored only if every file arrived
//! - **One download per publication** - concurrent requests share it
//! - **Pluggable seams** - metadata, persistence and transfers are traits
//! - **Event-driven** - consumers subscribe to download events
//!
//! ## Quick Start
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use issue_cache::{Config, ContentService, IssuePublication};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.api.base_url = "https://api.example.com".to_string();
//!
//!     let service = ContentService::new(config).await?;
//!
//!     let mut events = service.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let date = NaiveDate::from_ymd_opt(2024, 5, 1).ok_or("bad date")?;
//!     let issue = service
//!         .download_to_cache(&IssuePublication::new("taz", date))
//!         .await?;
//!     println!("{} has {} articles", issue.key(), issue.articles().count());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Failure-aggregating join over file transfers
pub mod cache_operation;
/// Configuration types
pub mod config;
/// Download orchestration
pub mod content;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// File transfer seam and HTTP implementation
pub mod file_downloader;
/// Bounded in-memory issue cache
pub mod memory_cache;
/// Metadata API client
pub mod metadata;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use cache_operation::{CacheItem, CacheOperation, CacheOperationItem, SharedPriority};
pub use config::Config;
pub use content::{ContentService, DownloadOptions, StorageLayout};
pub use db::{Database, IssueRepository};
pub use error::{CacheOperationFailed, DatabaseError, Error, FileFailure, Result};
pub use file_downloader::{FileDownloader, HttpFileDownloader};
pub use memory_cache::IssueInMemoryCache;
pub use metadata::{HttpMetadataApi, MetadataApi};
pub use types::{
    Article, ArticleStub, DownloadPriority, Event, FileEntry, Issue, IssueDescriptor, IssueKey,
    IssuePublication, IssueStatus, IssueStub, ResourceDescriptor, Section, StorageType,
};
