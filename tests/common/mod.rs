//! Common test utilities for issue-cache integration tests
//!
//! [`IssueServer`] serves a small issue over HTTP: the metadata API under
//! `/api` and file contents under `/files`.

#![allow(dead_code)]

use chrono::NaiveDate;
use issue_cache::types::{ArticleDescriptor, SectionDescriptor};
use issue_cache::{
    Config, FileEntry, IssueDescriptor, IssuePublication, IssueStatus, ResourceDescriptor,
    StorageType,
};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Issue files served for the fixture publication
pub const ISSUE_FILES: [(&str, &[u8]); 5] = [
    ("moment.jpg", b"\xff\xd8cover"),
    ("seite1.html", b"<html>Seite 1</html>"),
    ("art1.html", b"<html>First article</html>"),
    ("art1.jpg", b"\xff\xd8photo"),
    ("art2.html", b"<html>Second article</html>"),
];

/// Global files (shared between issues)
pub const GLOBAL_FILES: [(&str, &[u8]); 3] = [
    ("logo.png", b"\x89PNGlogo"),
    ("tazApi.css", b"body { margin: 0 }"),
    ("tazApi.js", b"function init() {}"),
];

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date")
}

pub fn publication() -> IssuePublication {
    IssuePublication::new("taz", date())
}

pub fn entry(name: &str, body: &[u8], storage_type: StorageType) -> FileEntry {
    FileEntry {
        name: name.to_string(),
        storage_type,
        sha256: format!("{:x}", Sha256::digest(body)),
        size: body.len() as u64,
        moment: 1_714_521_600_000,
    }
}

fn issue_entry(name: &str) -> FileEntry {
    let (_, body) = ISSUE_FILES
        .iter()
        .find(|(n, _)| *n == name)
        .expect("known issue file");
    entry(name, body, StorageType::Issue)
}

fn global_entry(name: &str) -> FileEntry {
    let (_, body) = GLOBAL_FILES
        .iter()
        .find(|(n, _)| *n == name)
        .expect("known global file");
    entry(name, body, StorageType::Global)
}

/// Mock metadata API and file host
pub struct IssueServer {
    pub server: MockServer,
}

impl IssueServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn api_url(&self) -> String {
        format!("{}/api", self.server.uri())
    }

    pub fn descriptor(&self, status: IssueStatus) -> IssueDescriptor {
        IssueDescriptor {
            key: publication().with_status(status),
            base_url: format!("{}/files/taz/2024-05-01", self.server.uri()),
            min_resource_version: 1,
            moment: vec![issue_entry("moment.jpg")],
            sections: vec![SectionDescriptor {
                key: "seite1".to_string(),
                title: "Seite 1".to_string(),
                extended_title: None,
                html: issue_entry("seite1.html"),
                images: vec![global_entry("logo.png")],
                articles: vec![
                    ArticleDescriptor {
                        key: "art1".to_string(),
                        title: Some("First".to_string()),
                        teaser: Some("The first article".to_string()),
                        authors: vec!["A. Author".to_string()],
                        html: issue_entry("art1.html"),
                        images: vec![issue_entry("art1.jpg")],
                    },
                    ArticleDescriptor {
                        key: "art2".to_string(),
                        title: Some("Second".to_string()),
                        teaser: None,
                        authors: Vec::new(),
                        html: issue_entry("art2.html"),
                        images: Vec::new(),
                    },
                ],
            }],
        }
    }

    pub fn resources(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            version: 1,
            base_url: format!("{}/files/resources", self.server.uri()),
            files: vec![global_entry("tazApi.css"), global_entry("tazApi.js")],
        }
    }

    /// Serve the issue metadata and the resource bundle descriptor
    pub async fn mount_metadata(&self, status: IssueStatus) {
        Mock::given(method("GET"))
            .and(path("/api/issues/taz/2024-05-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(self.descriptor(status)))
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/resources"))
            .respond_with(ResponseTemplate::new(200).set_body_json(self.resources()))
            .mount(&self.server)
            .await;
    }

    /// Serve every file except those in `missing`, which return 404
    pub async fn mount_files(&self, missing: &[&str]) {
        for (name, body) in ISSUE_FILES {
            self.mount_file(
                &format!("/files/taz/2024-05-01/{name}"),
                body,
                missing.contains(&name),
            )
            .await;
        }
        // logo.png is referenced from the issue, the rest from the resource bundle
        for (name, body) in GLOBAL_FILES {
            let dir = if name == "logo.png" {
                "taz/2024-05-01"
            } else {
                "resources"
            };
            self.mount_file(&format!("/files/{dir}/{name}"), body, missing.contains(&name))
                .await;
        }
    }

    async fn mount_file(&self, file_path: &str, body: &[u8], missing: bool) {
        let response = if missing {
            ResponseTemplate::new(404)
        } else {
            ResponseTemplate::new(200).set_body_bytes(body.to_vec())
        };
        Mock::given(method("GET"))
            .and(path(file_path))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// Number of requests received for `request_path`
    pub async fn hits(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == request_path)
            .count()
    }
}

/// Config rooted in `dir` talking to `server`, with fast retries
pub fn test_config(dir: &TempDir, server: &IssueServer) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().join("data");
    config.persistence.database_path = dir.path().join("issue-cache.db");
    config.api.base_url = server.api_url();
    for retry in [&mut config.metadata_retry, &mut config.file_retry] {
        retry.max_attempts = 1;
        retry.initial_delay = Duration::from_millis(10);
        retry.max_delay = Duration::from_millis(20);
        retry.jitter = false;
    }
    config
}
