//! End-to-end tests for the content service
//!
//! These run the production components (HTTP metadata client, HTTP file
//! downloader, SQLite repository) against a local mock server.

mod common;

use common::{GLOBAL_FILES, ISSUE_FILES, IssueServer, entry, publication, test_config};
use issue_cache::{ContentService, DownloadPriority, Error, Event, IssueStatus, StorageType};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn downloads_issue_and_serves_it_offline() {
    let server = IssueServer::start().await;
    server.mount_metadata(IssueStatus::Regular).await;
    server.mount_files(&[]).await;
    let dir = TempDir::new().unwrap();

    let service = ContentService::new(test_config(&dir, &server))
        .await
        .unwrap();
    let issue = service.download_to_cache(&publication()).await.unwrap();

    assert_eq!(issue.key(), &publication().with_status(IssueStatus::Regular));
    assert_eq!(issue.articles().count(), 2);
    assert_eq!(
        issue.article("art1").unwrap().stub.authors,
        vec!["A. Author".to_string()]
    );

    let issue_dir = service.layout().issue_dir(&publication());
    for (name, body) in ISSUE_FILES {
        assert_eq!(std::fs::read(issue_dir.join(name)).unwrap(), body, "{name}");
    }
    let global_dir = service.layout().data_dir().join("global");
    for (name, body) in GLOBAL_FILES {
        assert_eq!(std::fs::read(global_dir.join(name)).unwrap(), body, "{name}");
    }

    service.shutdown().await.unwrap();

    // A new service over the same storage answers without the network
    let offline = ContentService::new(test_config(&dir, &server))
        .await
        .unwrap();
    assert!(offline.is_present(&publication()).await.unwrap());
    let reloaded = offline.download_to_cache(&publication()).await.unwrap();
    assert_eq!(reloaded.key(), issue.key());
    assert_eq!(server.hits("/api/issues/taz/2024-05-01").await, 1);
}

#[tokio::test]
async fn missing_file_fails_download_and_stores_nothing() {
    let server = IssueServer::start().await;
    server.mount_metadata(IssueStatus::Regular).await;
    server.mount_files(&["art2.html"]).await;
    let dir = TempDir::new().unwrap();

    let service = ContentService::new(test_config(&dir, &server))
        .await
        .unwrap();
    let mut events = service.subscribe();

    let err = service.download_to_cache(&publication()).await.unwrap_err();

    let Error::CacheOperationFailed(failure) = err else {
        panic!("expected CacheOperationFailed, got {err:?}");
    };
    assert_eq!(failure.failed_names(), vec!["art2.html"]);
    assert_eq!(failure.total, 8);

    // 404 is permanent, so it is not retried
    assert_eq!(server.hits("/files/taz/2024-05-01/art2.html").await, 1);
    assert!(!service.is_present(&publication()).await.unwrap());
    assert!(service.memory_cache().is_empty());

    let issue_dir = service.layout().issue_dir(&publication());
    assert!(!issue_dir.join("art2.html").exists());
    assert!(!issue_dir.join("art2.html.part").exists());

    let mut failed = None;
    while let Ok(event) = events.try_recv() {
        if let Event::DownloadFailed { failed_files, .. } = event {
            failed = Some(failed_files);
        }
    }
    assert_eq!(failed, Some(vec!["art2.html".to_string()]));
}

#[tokio::test]
async fn concurrent_requests_fetch_each_file_once() {
    let server = IssueServer::start().await;
    server.mount_metadata(IssueStatus::Regular).await;
    server.mount_files(&[]).await;
    let dir = TempDir::new().unwrap();

    let service = ContentService::new(test_config(&dir, &server))
        .await
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.download_to_cache(&publication()).await })
        })
        .collect();
    let mut issues = Vec::new();
    for handle in handles {
        issues.push(handle.await.unwrap().unwrap());
    }

    assert!(issues.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(server.hits("/api/issues/taz/2024-05-01").await, 1);
    assert_eq!(server.hits("/files/taz/2024-05-01/art1.html").await, 1);
    assert_eq!(server.hits("/files/resources/tazApi.css").await, 1);
}

#[tokio::test]
async fn deleted_issue_is_downloaded_again() {
    let server = IssueServer::start().await;
    server.mount_metadata(IssueStatus::Demo).await;
    server.mount_files(&[]).await;
    let dir = TempDir::new().unwrap();

    let service = ContentService::new(test_config(&dir, &server))
        .await
        .unwrap();
    service.download_to_cache(&publication()).await.unwrap();

    service.delete_issue(&publication()).await.unwrap();
    assert!(!service.is_present(&publication()).await.unwrap());
    assert!(!service.layout().issue_dir(&publication()).exists());

    let issue = service.download_to_cache(&publication()).await.unwrap();
    assert_eq!(issue.key().status, IssueStatus::Demo);
    assert_eq!(server.hits("/api/issues/taz/2024-05-01").await, 2);
    // the resource bundle is still current
    assert_eq!(server.hits("/api/resources").await, 1);
}

#[tokio::test]
async fn single_file_is_fetched_once_and_reused() {
    let server = IssueServer::start().await;
    server.mount_files(&[]).await;
    let dir = TempDir::new().unwrap();
    let (name, body) = ISSUE_FILES[2];
    let file = entry(name, body, StorageType::Issue);
    let base_url = server.descriptor(IssueStatus::Regular).base_url;

    let service = ContentService::new(test_config(&dir, &server))
        .await
        .unwrap();
    let first = service
        .download_file_if_missing(&file, &base_url, &publication(), DownloadPriority::High)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&first).unwrap(), body);

    let second = service
        .download_file_if_missing(&file, &base_url, &publication(), DownloadPriority::Low)
        .await
        .unwrap();
    assert_eq!(second, first);
    assert_eq!(server.hits("/files/taz/2024-05-01/art1.html").await, 1);
    assert!(!service.is_present(&publication()).await.unwrap());
}

#[tokio::test]
async fn shutdown_rejects_new_downloads() {
    let server = IssueServer::start().await;
    let dir = TempDir::new().unwrap();

    let service = ContentService::new(test_config(&dir, &server))
        .await
        .unwrap();
    service.shutdown().await.unwrap();

    let err = service.download_to_cache(&publication()).await.unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
    assert_eq!(server.hits("/api/issues/taz/2024-05-01").await, 0);
}
