//! Configuration types for issue-cache

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::IssueStatus;

/// Main configuration for the content service
///
/// Fields are organized into logical sub-configs:
/// - [`storage`](StorageConfig): where downloaded files live
/// - [`download`](DownloadConfig): concurrency and integrity checks
/// - [`metadata_retry`] / [`file_retry`]: backoff policies
/// - [`memory_cache`](MemoryCacheConfig): in-memory issue cache
/// - [`persistence`](PersistenceConfig): SQLite database
/// - [`api`](ApiConfig): metadata API endpoint
///
/// [`metadata_retry`]: Config::metadata_retry
/// [`file_retry`]: Config::file_retry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// File storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// File transfer settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Retry policy for metadata requests
    #[serde(default)]
    pub metadata_retry: RetryConfig,

    /// Retry policy for individual file transfers
    #[serde(default = "default_file_retry")]
    pub file_retry: RetryConfig,

    /// In-memory issue cache settings
    #[serde(default)]
    pub memory_cache: MemoryCacheConfig,

    /// Database settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Metadata API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Least valuable issue variant that satisfies a request (default: public)
    #[serde(default)]
    pub min_status: IssueStatus,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            download: DownloadConfig::default(),
            metadata_retry: RetryConfig::default(),
            file_retry: default_file_retry(),
            memory_cache: MemoryCacheConfig::default(),
            persistence: PersistenceConfig::default(),
            api: ApiConfig::default(),
            min_status: IssueStatus::default(),
        }
    }
}

impl Config {
    /// Check the configuration for values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.memory_cache.capacity == 0 {
            return Err(Error::Config {
                message: "memory cache capacity must be at least 1".to_string(),
                key: Some("memory_cache.capacity".to_string()),
            });
        }
        if self.download.max_simultaneous_downloads == 0 {
            return Err(Error::Config {
                message: "max_simultaneous_downloads must be at least 1".to_string(),
                key: Some("download.max_simultaneous_downloads".to_string()),
            });
        }
        if self.api.base_url.trim().is_empty() {
            return Err(Error::Config {
                message: "metadata API base URL is empty".to_string(),
                key: Some("api.base_url".to_string()),
            });
        }
        if url::Url::parse(&self.api.base_url).is_err() {
            return Err(Error::Config {
                message: format!("invalid metadata API base URL: {}", self.api.base_url),
                key: Some("api.base_url".to_string()),
            });
        }
        for (key, retry) in [
            ("metadata_retry", &self.metadata_retry),
            ("file_retry", &self.file_retry),
        ] {
            if retry.backoff_multiplier < 1.0 {
                return Err(Error::Config {
                    message: format!(
                        "backoff_multiplier must be >= 1.0, got {}",
                        retry.backoff_multiplier
                    ),
                    key: Some(format!("{key}.backoff_multiplier")),
                });
            }
        }
        Ok(())
    }
}

/// File storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for issue and global files (default: "./data")
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// File transfer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum concurrent file transfers (default: 4)
    #[serde(default = "default_max_simultaneous_downloads")]
    pub max_simultaneous_downloads: usize,

    /// Reject files whose size or SHA-256 differs from the metadata (default: true)
    #[serde(default = "default_true")]
    pub verify_checksums: bool,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_simultaneous_downloads: default_max_simultaneous_downloads(),
            verify_checksums: true,
            request_timeout: default_request_timeout(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// In-memory issue cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    /// Maximum number of issues kept in memory (default: 5)
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

/// Database configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./issue-cache.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Metadata API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the metadata API (default: "http://localhost:8080/api")
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./issue-cache.db")
}

fn default_api_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_max_simultaneous_downloads() -> usize {
    4
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_cache_capacity() -> usize {
    5
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// File transfers give up sooner than metadata requests
fn default_file_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        max_delay: Duration::from_secs(10),
        ..RetryConfig::default()
    }
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
