//! Metadata API seam.
//!
//! The content service asks a [`MetadataApi`] for the descriptor of an issue
//! and for the shared resource bundle. Transient failures surface as
//! [`Error::Connectivity`](crate::Error::Connectivity) so that callers can
//! retry them.

mod http;

pub use http::HttpMetadataApi;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{IssueDescriptor, IssuePublication, ResourceDescriptor};

/// Source of issue and resource metadata
#[async_trait]
pub trait MetadataApi: Send + Sync {
    /// Fetch the most valuable variant of a publication the caller may access
    async fn fetch_issue_descriptor(
        &self,
        publication: &IssuePublication,
    ) -> Result<IssueDescriptor>;

    /// Fetch the current resource bundle description
    async fn fetch_resource_descriptor(&self) -> Result<ResourceDescriptor>;
}
