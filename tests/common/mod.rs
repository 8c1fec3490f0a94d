#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use quire::models::{Category, Id, Post, Tag};
use quire::repo::inmem::InMemRepo;
use quire::repo::{BackupRepo, Snapshot};

pub const PNG_1X1: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

pub fn category(id: Id, name: &str) -> Category {
    Category { id, name: name.into(), description: Some(format!("{name} posts")) }
}

pub fn tag(id: Id, name: &str) -> Tag {
    Tag { id, name: name.into() }
}

/// Post dated `day` days into January 2024, so higher `day` sorts first.
pub fn post(id: Id, day: u32, title: &str, content: &str, category_id: Option<Id>) -> Post {
    Post {
        id,
        title: title.into(),
        content: content.into(),
        date_posted: Utc.with_ymd_and_hms(2024, 1, day, 9, 30, 0).unwrap(),
        views: 0,
        category_id,
    }
}

pub async fn seeded(snapshot: Snapshot) -> InMemRepo {
    let repo = InMemRepo::new();
    repo.replace_all(snapshot).await.unwrap();
    repo.repair_sequences().await.unwrap();
    repo
}

/// Two categories, two tags, three posts.
pub fn blog() -> Snapshot {
    Snapshot {
        categories: vec![category(1, "ABAP"), category(2, "Web Development")],
        tags: vec![tag(1, "sap"), tag(2, "rust")],
        posts: vec![
            post(1, 1, "Hello ABAP", "<p>Intro to <b>SAP</b> programming</p>", Some(1)),
            post(2, 2, "Frontend notes", "<p>The database layer is fine</p>", Some(2)),
            post(3, 3, "Misc", "<p>We talk about data here.</p>", None),
        ],
        links: vec![(1, 1), (1, 2), (3, 2)],
    }
}
