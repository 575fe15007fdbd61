//! Core types for issue-cache

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Access level of an issue variant
///
/// Variants are ordered by value: `Public < Demo < Regular`. When several
/// variants of a publication are available the greatest one is preferred.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    /// Freely available preview
    #[default]
    Public,
    /// Trial subscription content
    Demo,
    /// Full subscriber content
    Regular,
}

impl IssueStatus {
    /// All statuses, most valuable first
    pub const DESCENDING: [IssueStatus; 3] =
        [IssueStatus::Regular, IssueStatus::Demo, IssueStatus::Public];

    /// Convert IssueStatus to integer for database storage
    ///
    /// The encoding preserves ordering, so `ORDER BY status DESC` yields the
    /// most valuable variant first.
    pub fn to_i32(&self) -> i32 {
        match self {
            IssueStatus::Public => 0,
            IssueStatus::Demo => 1,
            IssueStatus::Regular => 2,
        }
    }

    /// Convert integer from database to IssueStatus
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(IssueStatus::Public),
            1 => Some(IssueStatus::Demo),
            2 => Some(IssueStatus::Regular),
            _ => None,
        }
    }

    /// Lowercase name, as used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Public => "public",
            IssueStatus::Demo => "demo",
            IssueStatus::Regular => "regular",
        }
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority of a download
///
/// Queued transfers are started highest priority first.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum DownloadPriority {
    /// Background work such as automatic downloads
    Low,
    /// Regular user-initiated downloads
    #[default]
    Normal,
    /// Content the user is waiting for right now
    High,
}

impl DownloadPriority {
    /// Compact encoding for atomic storage
    pub fn to_u8(self) -> u8 {
        match self {
            DownloadPriority::Low => 0,
            DownloadPriority::Normal => 1,
            DownloadPriority::High => 2,
        }
    }

    /// Inverse of [`to_u8`](Self::to_u8); unknown values map to `High`
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => DownloadPriority::Low,
            1 => DownloadPriority::Normal,
            _ => DownloadPriority::High,
        }
    }
}

/// A publication: one feed on one date, regardless of access level
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssuePublication {
    /// Feed name (e.g. "taz")
    pub feed: String,
    /// Publication date
    pub date: NaiveDate,
}

impl IssuePublication {
    /// Create a new publication
    pub fn new(feed: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            feed: feed.into(),
            date,
        }
    }

    /// The key of this publication's variant with the given status
    pub fn with_status(&self, status: IssueStatus) -> IssueKey {
        IssueKey {
            feed: self.feed.clone(),
            date: self.date,
            status,
        }
    }
}

impl std::fmt::Display for IssuePublication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.feed, self.date)
    }
}

impl From<&IssueKey> for IssuePublication {
    fn from(key: &IssueKey) -> Self {
        Self {
            feed: key.feed.clone(),
            date: key.date,
        }
    }
}

/// Identity of one issue variant
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueKey {
    /// Feed name
    pub feed: String,
    /// Publication date
    pub date: NaiveDate,
    /// Access level of this variant
    pub status: IssueStatus,
}

impl IssueKey {
    /// Create a new key
    pub fn new(feed: impl Into<String>, date: NaiveDate, status: IssueStatus) -> Self {
        Self {
            feed: feed.into(),
            date,
            status,
        }
    }

    /// Whether this key belongs to the given publication
    pub fn is_variant_of(&self, publication: &IssuePublication) -> bool {
        self.feed == publication.feed && self.date == publication.date
    }
}

impl std::fmt::Display for IssueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.feed, self.date, self.status)
    }
}

/// Where a file lives on disk
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Scoped to one issue, deleted with it
    Issue,
    /// Shared between issues (fonts, stylesheets, resources)
    Global,
}

/// A remote file as described by the metadata API
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileEntry {
    /// File name, unique within its storage scope
    pub name: String,
    /// Storage scope
    pub storage_type: StorageType,
    /// Lowercase hex SHA-256 of the content
    pub sha256: String,
    /// Size in bytes
    pub size: u64,
    /// Modification time (unix millis)
    pub moment: i64,
}

/// Top-level metadata of an issue variant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueStub {
    /// Issue variant identity
    pub key: IssueKey,
    /// Base URL issue files are fetched from
    pub base_url: String,
    /// Minimum resource bundle version this issue needs
    pub min_resource_version: i64,
    /// When the issue finished downloading (`None` if never)
    pub downloaded_at: Option<DateTime<Utc>>,
    /// Last displayed position (section or article key)
    pub last_displayable: Option<String>,
}

/// Metadata and reading state of an article
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleStub {
    /// Article key, unique within its issue
    pub key: String,
    /// Feed of the issue containing the article
    pub issue_feed: String,
    /// Date of the issue containing the article
    pub issue_date: NaiveDate,
    /// Headline
    pub title: Option<String>,
    /// Teaser text
    pub teaser: Option<String>,
    /// Author names
    pub authors: Vec<String>,
    /// Whether the reader bookmarked the article
    pub bookmarked: bool,
    /// Reading progress (0-100)
    pub read_percentage: u8,
    /// Opaque scroll position
    pub read_position: Option<String>,
}

impl ArticleStub {
    /// The publication this article belongs to
    pub fn publication(&self) -> IssuePublication {
        IssuePublication::new(self.issue_feed.clone(), self.issue_date)
    }
}

/// A fully materialized article
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Article {
    /// Metadata and reading state
    pub stub: ArticleStub,
    /// Article body
    pub html: FileEntry,
    /// Images referenced by the body
    pub images: Vec<FileEntry>,
}

/// A fully materialized section
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    /// Section key
    pub key: String,
    /// Section title
    pub title: String,
    /// Optional long title
    pub extended_title: Option<String>,
    /// Section front page
    pub html: FileEntry,
    /// Images of the section front page
    pub images: Vec<FileEntry>,
    /// Articles in reading order
    pub articles: Vec<Arc<Article>>,
}

/// A fully materialized issue, as kept in the memory cache
///
/// Sections and articles are shared via `Arc`; patching one article
/// produces a new `Issue` that shares every other node with the old one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Issue {
    /// Top-level metadata
    pub stub: IssueStub,
    /// Sections in reading order
    pub sections: Vec<Arc<Section>>,
    /// Cover ("moment") images
    pub moment: Vec<FileEntry>,
}

impl Issue {
    /// Build an issue from its descriptor
    ///
    /// Every article starts with default reading state; callers overlay
    /// persisted state afterwards.
    pub fn from_descriptor(
        descriptor: &IssueDescriptor,
        downloaded_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        descriptor.validate()?;
        let key = descriptor.key.clone();
        let sections = descriptor
            .sections
            .iter()
            .map(|section| {
                let articles = section
                    .articles
                    .iter()
                    .map(|article| {
                        Arc::new(Article {
                            stub: ArticleStub {
                                key: article.key.clone(),
                                issue_feed: key.feed.clone(),
                                issue_date: key.date,
                                title: article.title.clone(),
                                teaser: article.teaser.clone(),
                                authors: article.authors.clone(),
                                bookmarked: false,
                                read_percentage: 0,
                                read_position: None,
                            },
                            html: article.html.clone(),
                            images: article.images.clone(),
                        })
                    })
                    .collect();
                Arc::new(Section {
                    key: section.key.clone(),
                    title: section.title.clone(),
                    extended_title: section.extended_title.clone(),
                    html: section.html.clone(),
                    images: section.images.clone(),
                    articles,
                })
            })
            .collect();

        Ok(Self {
            stub: IssueStub {
                key,
                base_url: descriptor.base_url.clone(),
                min_resource_version: descriptor.min_resource_version,
                downloaded_at,
                last_displayable: None,
            },
            sections,
            moment: descriptor.moment.clone(),
        })
    }

    /// Issue variant identity
    pub fn key(&self) -> &IssueKey {
        &self.stub.key
    }

    /// The publication this issue is a variant of
    pub fn publication(&self) -> IssuePublication {
        IssuePublication::from(&self.stub.key)
    }

    /// Look up an article by key
    pub fn article(&self, key: &str) -> Option<&Arc<Article>> {
        self.sections
            .iter()
            .flat_map(|s| s.articles.iter())
            .find(|a| a.stub.key == key)
    }

    /// Iterate over all articles in reading order
    pub fn articles(&self) -> impl Iterator<Item = &Arc<Article>> {
        self.sections.iter().flat_map(|s| s.articles.iter())
    }

    /// A copy of this issue with a replaced stub, sharing all sections
    pub fn with_stub(&self, stub: IssueStub) -> Self {
        Self {
            stub,
            sections: self.sections.clone(),
            moment: self.moment.clone(),
        }
    }

    /// A copy of this issue with one article's stub replaced
    ///
    /// Only the article, its section and the issue are rebuilt. Returns
    /// `None` if the issue has no article with the stub's key.
    pub fn with_article(&self, stub: &ArticleStub) -> Option<Self> {
        let (section_idx, article_idx) =
            self.sections.iter().enumerate().find_map(|(si, section)| {
                section
                    .articles
                    .iter()
                    .position(|a| a.stub.key == stub.key)
                    .map(|ai| (si, ai))
            })?;

        let section = &self.sections[section_idx];
        let old = &section.articles[article_idx];
        let patched = Arc::new(Article {
            stub: stub.clone(),
            html: old.html.clone(),
            images: old.images.clone(),
        });

        let mut articles = section.articles.clone();
        articles[article_idx] = patched;
        let mut sections = self.sections.clone();
        sections[section_idx] = Arc::new(Section {
            key: section.key.clone(),
            title: section.title.clone(),
            extended_title: section.extended_title.clone(),
            html: section.html.clone(),
            images: section.images.clone(),
            articles,
        });

        Some(Self {
            stub: self.stub.clone(),
            sections,
            moment: self.moment.clone(),
        })
    }
}

/// Article as described by the metadata API
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleDescriptor {
    /// Article key
    pub key: String,
    /// Headline
    #[serde(default)]
    pub title: Option<String>,
    /// Teaser text
    #[serde(default)]
    pub teaser: Option<String>,
    /// Author names
    #[serde(default)]
    pub authors: Vec<String>,
    /// Article body
    pub html: FileEntry,
    /// Images
    #[serde(default)]
    pub images: Vec<FileEntry>,
}

/// Section as described by the metadata API
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDescriptor {
    /// Section key
    pub key: String,
    /// Section title
    pub title: String,
    /// Optional long title
    #[serde(default)]
    pub extended_title: Option<String>,
    /// Section front page
    pub html: FileEntry,
    /// Images of the section front page
    #[serde(default)]
    pub images: Vec<FileEntry>,
    /// Articles in reading order
    #[serde(default)]
    pub articles: Vec<ArticleDescriptor>,
}

/// Full metadata of an issue variant as returned by the metadata API
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDescriptor {
    /// Variant actually served
    pub key: IssueKey,
    /// Base URL issue files are fetched from
    pub base_url: String,
    /// Minimum resource bundle version this issue needs
    #[serde(default)]
    pub min_resource_version: i64,
    /// Cover images
    #[serde(default)]
    pub moment: Vec<FileEntry>,
    /// Sections in reading order
    #[serde(default)]
    pub sections: Vec<SectionDescriptor>,
}

impl IssueDescriptor {
    /// Check structural invariants (article keys unique within the issue)
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for article in self.sections.iter().flat_map(|s| s.articles.iter()) {
            if !seen.insert(article.key.as_str()) {
                return Err(Error::InvalidDescriptor(format!(
                    "duplicate article key {} in {}",
                    article.key, self.key
                )));
            }
        }
        Ok(())
    }

    /// Every file the issue needs, in reading order (may contain repeats)
    pub fn files(&self) -> Vec<&FileEntry> {
        let mut files: Vec<&FileEntry> = self.moment.iter().collect();
        for section in &self.sections {
            files.push(&section.html);
            files.extend(section.images.iter());
            for article in &section.articles {
                files.push(&article.html);
                files.extend(article.images.iter());
            }
        }
        files
    }
}

/// The shared resource bundle (stylesheets, fonts, scripts)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Bundle version
    pub version: i64,
    /// Base URL resource files are fetched from
    pub base_url: String,
    /// Resource files
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// Event emitted during the download lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A download for a publication started (cache miss)
    DownloadStarted {
        /// Requested publication
        publication: IssuePublication,
    },

    /// Metadata was fetched and the file set is known
    MetadataResolved {
        /// Variant being downloaded
        key: IssueKey,
        /// Files that will be transferred
        total_files: usize,
        /// Files skipped because a verified copy is already on disk
        skipped_files: usize,
    },

    /// One file of a cache operation finished (successfully or not)
    ItemCompleted {
        /// Tag of the cache operation
        tag: String,
        /// File name
        name: String,
        /// Items completed so far
        completed: usize,
        /// Total items in the operation
        total: usize,
        /// Whether this item failed
        failed: bool,
    },

    /// Issue is fully downloaded, persisted and cached
    DownloadComplete {
        /// Variant that was stored
        key: IssueKey,
    },

    /// Download failed; nothing was persisted
    DownloadFailed {
        /// Requested publication
        publication: IssuePublication,
        /// Names of the files that failed (empty for metadata errors)
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        failed_files: Vec<String>,
        /// Error message
        error: String,
    },
}
