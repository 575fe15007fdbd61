//! On-disk placement of issue and global files.

use std::path::{Path, PathBuf};

use crate::db::GLOBAL_SCOPE;
use crate::error::{Error, Result};
use crate::types::{FileEntry, IssuePublication, StorageType};

/// Maps files to paths under the data directory
///
/// - issue files: `{data_dir}/{feed}/{date}/{name}`
/// - global files: `{data_dir}/global/{name}`
#[derive(Clone, Debug)]
pub struct StorageLayout {
    data_dir: PathBuf,
}

impl StorageLayout {
    /// Create a layout rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Root directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory holding the issue-scoped files of a publication
    pub fn issue_dir(&self, publication: &IssuePublication) -> PathBuf {
        self.data_dir
            .join(&publication.feed)
            .join(publication.date.to_string())
    }

    /// Destination of a file
    ///
    /// Rejects names that could escape their directory.
    pub fn path_for(&self, file: &FileEntry, publication: &IssuePublication) -> Result<PathBuf> {
        if file.name.is_empty()
            || file.name == "."
            || file.name.contains("..")
            || file.name.contains(['/', '\\'])
        {
            return Err(Error::InvalidDescriptor(format!(
                "unsafe file name {:?}",
                file.name
            )));
        }
        let dir = match file.storage_type {
            StorageType::Issue => self.issue_dir(publication),
            StorageType::Global => self.data_dir.join(GLOBAL_SCOPE),
        };
        Ok(dir.join(&file.name))
    }
}
