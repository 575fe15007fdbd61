mod issues;

use crate::types::{
    ArticleDescriptor, FileEntry, IssueDescriptor, IssueKey, IssueStatus, SectionDescriptor,
    StorageType,
};
use chrono::NaiveDate;

pub(super) fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

pub(super) fn file(name: &str, storage_type: StorageType) -> FileEntry {
    FileEntry {
        name: name.to_string(),
        storage_type,
        sha256: format!("{:064x}", name.len()),
        size: name.len() as u64,
        moment: 1_714_521_600_000,
    }
}

pub(super) fn descriptor(status: IssueStatus) -> IssueDescriptor {
    IssueDescriptor {
        key: IssueKey::new("taz", date(), status),
        base_url: "https://cdn.example.com/taz/2024-05-01".to_string(),
        min_resource_version: 4,
        moment: vec![file("moment.jpg", StorageType::Issue)],
        sections: vec![SectionDescriptor {
            key: "seite1".to_string(),
            title: "Seite 1".to_string(),
            extended_title: None,
            html: file("section.seite1.html", StorageType::Issue),
            images: vec![file("logo.png", StorageType::Global)],
            articles: vec![
                ArticleDescriptor {
                    key: "art1.html".to_string(),
                    title: Some("First".to_string()),
                    teaser: Some("Teaser".to_string()),
                    authors: vec!["A. Author".to_string()],
                    html: file("art1.html", StorageType::Issue),
                    images: vec![file("art1.jpg", StorageType::Issue)],
                },
                ArticleDescriptor {
                    key: "art2.html".to_string(),
                    title: Some("Second".to_string()),
                    teaser: None,
                    authors: vec![],
                    html: file("art2.html", StorageType::Issue),
                    images: vec![],
                },
            ],
        }],
    }
}
