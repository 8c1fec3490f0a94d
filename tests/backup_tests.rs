#![cfg(feature = "inmem-store")]

mod common;

use common::*;
use quire::auth::{AdminContext, Claims};
use quire::content;
use quire::dump::{self, Dump};
use quire::error::ApiError;
use quire::models::{NewCategory, NewPost, NewTag};
use quire::repo::inmem::InMemRepo;
use quire::repo::{BackupRepo, PostRepo};
use serde_json::json;

fn admin() -> AdminContext {
    AdminContext::admin("admin")
}

#[tokio::test]
async fn dump_shape() {
    let repo = seeded(blog()).await;
    let d = dump::export_dump(&repo, &admin()).await.unwrap();
    let v: serde_json::Value = serde_json::from_slice(&dump::to_json(&d).unwrap()).unwrap();
    assert_eq!(v["categories"][1], json!({"id": 2, "name": "Web Development", "description": "Web Development posts"}));
    assert_eq!(v["tags"][0], json!({"id": 1, "name": "sap"}));
    let first = &v["posts"][0];
    assert_eq!(first["date_posted"], "2024-01-01");
    assert_eq!(first["tags"], json!(["sap", "rust"]));
    assert_eq!(first["category_id"], 1);
    assert_eq!(v["posts"][2]["category_id"], serde_json::Value::Null);
}

#[tokio::test]
async fn round_trip_restores_everything() {
    let source = seeded(blog()).await;
    source.record_view(3).await.unwrap();
    let raw = dump::to_json(&dump::export_dump(&source, &admin()).await.unwrap()).unwrap();

    let target = seeded(Default::default()).await;
    let report = dump::restore_dump(&target, &admin(), &raw).await.unwrap();
    assert_eq!((report.categories, report.tags, report.posts, report.links), (2, 2, 3, 3));
    assert_eq!(report.dropped_tag_links, 0);

    let before = dump::snapshot_to_dump(&source.snapshot().await.unwrap());
    let after = dump::snapshot_to_dump(&target.snapshot().await.unwrap());
    assert_eq!(before, after);
    assert_eq!(target.get_post(3).await.unwrap().post.views, 1);
}

#[tokio::test]
async fn restore_replaces_existing_content() {
    let repo = seeded(blog()).await;
    let raw = json!({
        "categories": [{"id": 9, "name": "Only"}],
        "tags": [],
        "posts": [{"id": 5, "title": "Kept", "content": "<p>k</p>", "date_posted": "2023-06-01", "category_id": 9}]
    });
    dump::restore_dump(&repo, &admin(), raw.to_string().as_bytes()).await.unwrap();
    let snap = repo.snapshot().await.unwrap();
    assert_eq!(snap.categories.len(), 1);
    assert!(snap.tags.is_empty() && snap.links.is_empty());
    assert_eq!(snap.posts.iter().map(|p| p.id).collect::<Vec<_>>(), vec![5]);
}

#[tokio::test]
async fn unknown_tag_names_are_dropped() {
    let repo = InMemRepo::new();
    let raw = json!({
        "categories": [],
        "tags": [{"id": 1, "name": "sap"}],
        "posts": [{"id": 1, "title": "T", "content": "<p>c</p>", "date_posted": "2024-01-01",
                   "category_id": null, "tags": ["sap", "gone"]}]
    });
    let report = dump::restore_dump(&repo, &admin(), raw.to_string().as_bytes()).await.unwrap();
    assert_eq!(report.links, 1);
    assert_eq!(report.dropped_tag_links, 1);
    assert_eq!(repo.get_post(1).await.unwrap().tag_names(), vec!["sap".to_string()]);
}

#[tokio::test]
async fn malformed_dump_changes_nothing() {
    let repo = seeded(blog()).await;
    let err = dump::restore_dump(&repo, &admin(), b"{\"posts\": [{\"id\": \"x\"}]").await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));

    let dup = json!({"categories": [{"id": 1, "name": "A"}, {"id": 1, "name": "B"}]});
    let err = dump::restore_dump(&repo, &admin(), dup.to_string().as_bytes()).await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));

    assert_eq!(repo.snapshot().await.unwrap(), blog());
}

#[tokio::test]
async fn non_admin_is_refused_everywhere() {
    let repo = seeded(blog()).await;
    let anon = AdminContext::anonymous();
    let raw = dump::to_json(&Dump::default()).unwrap();
    assert!(matches!(dump::restore_dump(&repo, &anon, &raw).await, Err(ApiError::Forbidden)));
    assert!(matches!(dump::export_dump(&repo, &anon).await, Err(ApiError::Forbidden)));
    assert!(matches!(dump::fix_sequences(&repo, &anon).await, Err(ApiError::Forbidden)));
    assert_eq!(repo.snapshot().await.unwrap(), blog());
}

#[tokio::test]
async fn content_changes_need_admin() {
    let repo = seeded(blog()).await;
    let plain = AdminContext::from_claims(&Claims { sub: "visitor".into(), exp: usize::MAX, roles: vec![] });
    for ctx in [AdminContext::anonymous(), plain] {
        let post = NewPost { title: "Sneaky".into(), content: "<p>x</p>".into(), category_id: Some(1), tags: vec![1] };
        assert!(matches!(content::create_post(&repo, &ctx, post).await, Err(ApiError::Forbidden)));
        assert!(matches!(content::delete_post(&repo, &ctx, 1).await, Err(ApiError::Forbidden)));
        assert!(matches!(content::delete_post_by_title(&repo, &ctx, "Misc").await, Err(ApiError::Forbidden)));
        let category = NewCategory { name: "Hidden".into(), description: None };
        assert!(matches!(content::create_category(&repo, &ctx, category).await, Err(ApiError::Forbidden)));
        assert!(matches!(content::delete_category(&repo, &ctx, 1).await, Err(ApiError::Forbidden)));
        assert!(matches!(content::create_tag(&repo, &ctx, NewTag { name: "x".into() }).await, Err(ApiError::Forbidden)));
        assert!(matches!(content::delete_tag(&repo, &ctx, 1).await, Err(ApiError::Forbidden)));
    }
    assert_eq!(repo.snapshot().await.unwrap(), blog());
}

#[tokio::test]
async fn delete_by_title_matches_the_stored_title_exactly() {
    let mut snapshot = blog();
    snapshot.posts[2].title = "  Misc  ".into();
    let repo = seeded(snapshot).await;
    assert!(matches!(content::delete_post_by_title(&repo, &admin(), "Misc").await, Err(ApiError::NotFound)));
    let deleted = content::delete_post_by_title(&repo, &admin(), "  Misc  ").await.unwrap();
    assert_eq!(deleted.id, 3);
    assert!(matches!(content::delete_post_by_title(&repo, &admin(), "   ").await, Err(ApiError::Validation(_))));
}

#[tokio::test]
async fn restoring_the_largest_id_keeps_the_store_usable() {
    let repo = InMemRepo::new();
    let raw = json!({
        "posts": [{"id": i64::MAX, "title": "Edge", "content": "<p>e</p>", "date_posted": "2024-01-01"}]
    });
    let report = dump::restore_dump(&repo, &admin(), raw.to_string().as_bytes()).await.unwrap();
    let v = serde_json::to_value(&report.sequences).unwrap();
    assert_eq!(v[2], json!({"entity": "post", "status": "unsupported", "reason": "id space exhausted"}));
    assert_eq!(repo.get_post(i64::MAX).await.unwrap().post.title, "Edge");
}

#[tokio::test]
async fn new_rows_follow_restored_ids() {
    let repo = InMemRepo::new();
    let raw = dump::to_json(&dump::snapshot_to_dump(&blog())).unwrap();
    let report = dump::restore_dump(&repo, &admin(), &raw).await.unwrap();
    assert_eq!(report.sequences.len(), 3);

    let created = content::create_post(
        &repo,
        &admin(),
        NewPost { title: "After".into(), content: "<p>x</p>".into(), category_id: Some(1), tags: vec![] },
    )
    .await
    .unwrap();
    assert_eq!(created.post.id, 4);
}

#[tokio::test]
async fn standalone_sequence_repair() {
    let repo = InMemRepo::new();
    repo.replace_all(blog()).await.unwrap();
    let repairs = dump::fix_sequences(&repo, &admin()).await.unwrap();
    let v = serde_json::to_value(&repairs).unwrap();
    assert_eq!(v[0], json!({"entity": "category", "status": "advanced", "next_id": 3}));
}
