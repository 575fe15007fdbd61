//! Error types for issue-cache
//!
//! This module provides the error taxonomy of the library:
//! - Connectivity failures (transient, retried by the metadata and file layers)
//! - Per-file failures ([`FileFailure`]) collected while a cache operation runs
//! - Aggregate failures ([`CacheOperationFailed`]) listing every failed file
//! - Persistence, configuration and protocol errors
//!
//! [`Error`] is `Clone` so that one download result can be handed to every
//! caller that joined the same in-flight download. Foreign error types are
//! therefore held behind an `Arc`.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::types::{IssueKey, IssuePublication, IssueStatus};

/// Result type alias for issue-cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for issue-cache
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "memory_cache.capacity")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[source] Arc<sqlx::Error>),

    /// Transient connectivity problem (no route, timeout, server unavailable)
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// The metadata API answered with a non-transient error
    #[error("API error (HTTP {status}): {message}")]
    Api {
        /// HTTP status code returned by the API
        status: u16,
        /// Message describing the failed request
        message: String,
    },

    /// A file transfer answered with an unexpected HTTP status
    #[error("HTTP {status} while fetching {url}")]
    HttpStatus {
        /// HTTP status code of the response
        status: u16,
        /// URL that was requested
        url: String,
    },

    /// A downloaded file does not match its expected integrity metadata
    #[error("integrity check failed for {name}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        /// Name of the file
        name: String,
        /// Expected hash or size
        expected: String,
        /// Observed hash or size
        actual: String,
    },

    /// One or more files of a cache operation failed
    #[error(transparent)]
    CacheOperationFailed(#[from] CacheOperationFailed),

    /// The metadata describing an issue is inconsistent
    #[error("invalid issue descriptor: {0}")]
    InvalidDescriptor(String),

    /// The server only offers a less valuable variant than required
    #[error("issue {publication} is only available as {status}, {min_status} required")]
    MinStatusNotMet {
        /// The requested publication
        publication: IssuePublication,
        /// Status offered by the server
        status: IssueStatus,
        /// Minimum status required by the configuration
        min_status: IssueStatus,
    },

    /// The server returned a different issue variant than requested
    #[error("expected issue {expected}, server returned {actual}")]
    UnexpectedIssueKey {
        /// Key that was requested
        expected: IssueKey,
        /// Key that was returned
        actual: IssueKey,
    },

    /// Requested record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new downloads
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// HTTP client error
    #[error("network error: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[source] Arc<serde_json::Error>),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Sqlx(Arc::new(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(Arc::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(Arc::new(e))
    }
}

/// Database-related errors
#[derive(Debug, Clone, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored record could not be decoded
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

/// One file of a cache operation that could not be fetched or verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    /// Name of the file (its identity inside the operation)
    pub name: String,
    /// Why the file failed
    pub reason: String,
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.reason)
    }
}

/// Aggregate failure of a cache operation
///
/// Carries every per-file failure, never just the first one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct CacheOperationFailed {
    /// Tag of the operation (usually the publication being downloaded)
    pub tag: String,
    /// Number of files the operation contained
    pub total: usize,
    /// All failed files, in the order they were reported
    pub failures: Vec<FileFailure>,
}

impl fmt::Display for CacheOperationFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cache operation {} failed: {} of {} files failed",
            self.tag,
            self.failures.len(),
            self.total
        )?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { " (" } else { "; " };
            write!(f, "{sep}{failure}")?;
        }
        if !self.failures.is_empty() {
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl CacheOperationFailed {
    /// Names of all failed files
    pub fn failed_names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.name.as_str()).collect()
    }
}
