//! HTTP/JSON implementation of [`MetadataApi`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::MetadataApi;
use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::types::{IssueDescriptor, IssuePublication, ResourceDescriptor};

/// Metadata API client
///
/// Endpoints, relative to the configured base URL:
/// - `GET issues/{feed}/{date}` returns an [`IssueDescriptor`]
/// - `GET resources` returns a [`ResourceDescriptor`]
#[derive(Clone, Debug)]
pub struct HttpMetadataApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMetadataApi {
    /// Create a client for the configured endpoint
    pub fn new(config: &ApiConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                Error::Connectivity(format!("{url}: {e}"))
            } else {
                Error::from(e)
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::Connectivity(format!("HTTP {status} from {url}")));
        }
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: format!("GET {url} failed"),
            });
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                Error::Connectivity(format!("{url}: {e}"))
            } else {
                Error::from(e)
            }
        })?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl MetadataApi for HttpMetadataApi {
    async fn fetch_issue_descriptor(
        &self,
        publication: &IssuePublication,
    ) -> Result<IssueDescriptor> {
        let url = format!(
            "{}/issues/{}/{}",
            self.base_url, publication.feed, publication.date
        );
        tracing::debug!(publication = %publication, url = %url, "Fetching issue metadata");
        self.get_json(&url).await
    }

    async fn fetch_resource_descriptor(&self) -> Result<ResourceDescriptor> {
        let url = format!("{}/resources", self.base_url);
        tracing::debug!(url = %url, "Fetching resource metadata");
        self.get_json(&url).await
    }
}
