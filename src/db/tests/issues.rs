use super::{date, descriptor};
use crate::db::*;
use crate::types::{IssueKey, IssuePublication, IssueStatus};
use chrono::{TimeZone, Utc};
use tempfile::NamedTempFile;

async fn open() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

fn publication() -> IssuePublication {
    IssuePublication::new("taz", date())
}

#[tokio::test]
async fn test_save_and_get_issue() {
    let (db, _file) = open().await;
    let desc = descriptor(IssueStatus::Regular);
    let downloaded_at = Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap();

    assert!(!db.is_downloaded(&desc.key).await.unwrap());
    db.save_issue(&desc, downloaded_at).await.unwrap();
    assert!(db.is_downloaded(&desc.key).await.unwrap());

    let issue = db.get_issue(&desc.key).await.unwrap().unwrap();
    assert_eq!(issue.key(), &desc.key);
    assert_eq!(issue.stub.downloaded_at, Some(downloaded_at));
    assert_eq!(issue.stub.min_resource_version, 4);
    assert_eq!(issue.sections.len(), 1);
    assert_eq!(issue.articles().count(), 2);
    assert_eq!(
        issue.article("art1.html").unwrap().stub.authors,
        vec!["A. Author".to_string()]
    );

    db.close().await;
}

#[tokio::test]
async fn test_get_missing_issue_returns_none() {
    let (db, _file) = open().await;
    let key = IssueKey::new("taz", date(), IssueStatus::Public);
    assert!(db.get_issue(&key).await.unwrap().is_none());
    assert!(!db.is_downloaded(&key).await.unwrap());
    db.close().await;
}

#[tokio::test]
async fn test_most_valuable_key_respects_min_status() {
    let (db, _file) = open().await;
    db.save_issue(&descriptor(IssueStatus::Public), Utc::now())
        .await
        .unwrap();
    db.save_issue(&descriptor(IssueStatus::Demo), Utc::now())
        .await
        .unwrap();

    let best = Database::most_valuable_key(&db, &publication(), IssueStatus::Public)
        .await
        .unwrap();
    assert_eq!(best.map(|k| k.status), Some(IssueStatus::Demo));

    let none = Database::most_valuable_key(&db, &publication(), IssueStatus::Regular)
        .await
        .unwrap();
    assert!(none.is_none());

    db.close().await;
}

#[tokio::test]
async fn test_update_issue_stub() {
    let (db, _file) = open().await;
    let desc = descriptor(IssueStatus::Regular);
    db.save_issue(&desc, Utc::now()).await.unwrap();

    let mut stub = db.get_issue(&desc.key).await.unwrap().unwrap().stub;
    stub.last_displayable = Some("art2.html".to_string());
    assert!(db.update_issue_stub(&stub).await.unwrap());

    let reloaded = db.get_issue(&desc.key).await.unwrap().unwrap();
    assert_eq!(reloaded.stub.last_displayable.as_deref(), Some("art2.html"));

    // re-saving the same variant keeps the reading position
    db.save_issue(&desc, Utc::now()).await.unwrap();
    let resaved = db.get_issue(&desc.key).await.unwrap().unwrap();
    assert_eq!(resaved.stub.last_displayable.as_deref(), Some("art2.html"));

    stub.key.status = IssueStatus::Public;
    assert!(!db.update_issue_stub(&stub).await.unwrap());

    db.close().await;
}

#[tokio::test]
async fn test_article_state_applies_to_every_variant() {
    let (db, _file) = open().await;
    db.save_issue(&descriptor(IssueStatus::Public), Utc::now())
        .await
        .unwrap();
    db.save_issue(&descriptor(IssueStatus::Regular), Utc::now())
        .await
        .unwrap();

    let regular_key = IssueKey::new("taz", date(), IssueStatus::Regular);
    let mut stub = db
        .get_issue(&regular_key)
        .await
        .unwrap()
        .unwrap()
        .article("art2.html")
        .unwrap()
        .stub
        .clone();
    stub.bookmarked = true;
    stub.read_percentage = 75;
    stub.read_position = Some("{\"y\":1200}".to_string());
    db.save_article_state(&stub).await.unwrap();

    for status in [IssueStatus::Public, IssueStatus::Regular] {
        let issue = db
            .get_issue(&IssueKey::new("taz", date(), status))
            .await
            .unwrap()
            .unwrap();
        let article = issue.article("art2.html").unwrap();
        assert!(article.stub.bookmarked);
        assert_eq!(article.stub.read_percentage, 75);
        assert!(!issue.article("art1.html").unwrap().stub.bookmarked);
    }

    db.close().await;
}

#[tokio::test]
async fn test_delete_publication_removes_everything_scoped_to_it() {
    let (db, _file) = open().await;
    db.save_issue(&descriptor(IssueStatus::Public), Utc::now())
        .await
        .unwrap();
    db.save_issue(&descriptor(IssueStatus::Regular), Utc::now())
        .await
        .unwrap();

    let mut removed = Database::delete_publication(&db, &publication())
        .await
        .unwrap();
    removed.sort_by_key(|k| k.status);
    assert_eq!(
        removed.iter().map(|k| k.status).collect::<Vec<_>>(),
        vec![IssueStatus::Public, IssueStatus::Regular]
    );

    assert!(
        Database::most_valuable_key(&db, &publication(), IssueStatus::Public)
            .await
            .unwrap()
            .is_none()
    );
    let scope = publication().to_string();
    assert!(db.get_file(&scope, "art1.html").await.unwrap().is_none());
    // global files survive
    assert!(db.get_file(GLOBAL_SCOPE, "logo.png").await.unwrap().is_some());

    db.close().await;
}

#[tokio::test]
async fn test_save_rejects_duplicate_article_keys() {
    let (db, _file) = open().await;
    let mut desc = descriptor(IssueStatus::Regular);
    let dup = desc.sections[0].articles[0].clone();
    desc.sections[0].articles.push(dup);

    let err = db.save_issue(&desc, Utc::now()).await.unwrap_err();
    assert!(matches!(err, crate::Error::InvalidDescriptor(_)));
    assert!(!db.is_downloaded(&desc.key).await.unwrap());

    db.close().await;
}

#[tokio::test]
async fn test_metadata_only_record_is_stored_but_not_downloaded() {
    let (db, _file) = open().await;
    let desc = descriptor(IssueStatus::Regular);

    db.save_metadata(&desc).await.unwrap();

    assert!(!db.is_downloaded(&desc.key).await.unwrap());
    assert_eq!(
        Database::most_valuable_key(&db, &publication(), IssueStatus::Public)
            .await
            .unwrap(),
        None
    );
    assert_eq!(
        db.stored_key(&publication(), IssueStatus::Public)
            .await
            .unwrap(),
        Some(desc.key.clone())
    );
    let issue = db.get_issue(&desc.key).await.unwrap().unwrap();
    assert_eq!(issue.stub.downloaded_at, None);
    assert_eq!(issue.articles().count(), 2);
    let scope = publication().to_string();
    assert!(db.get_file(&scope, "art1.html").await.unwrap().is_none());

    db.close().await;
}

#[tokio::test]
async fn test_metadata_does_not_overwrite_downloaded_variant() {
    let (db, _file) = open().await;
    let desc = descriptor(IssueStatus::Regular);
    db.save_issue(&desc, Utc::now()).await.unwrap();

    let mut newer = desc.clone();
    newer.base_url = "https://elsewhere.example.com".to_string();
    db.save_metadata(&newer).await.unwrap();

    let issue = db.get_issue(&desc.key).await.unwrap().unwrap();
    assert_eq!(issue.stub.base_url, desc.base_url);
    assert!(issue.stub.downloaded_at.is_some());
    assert!(db.is_downloaded(&desc.key).await.unwrap());

    db.close().await;
}
