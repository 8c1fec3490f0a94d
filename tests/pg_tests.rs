#![cfg(feature = "postgres-store")]

use chrono::{TimeZone, Utc};
use quire::models::{Category, NewPost, Post, Tag};
use quire::repo::pg::PgRepo;
use quire::repo::{BackupRepo, CategoryRepo, PostFilter, PostRepo, SequenceOutcome, Snapshot, TagRepo};
use quire::search::{search, SearchParams};
use serial_test::serial;

async fn pg_repo() -> Option<PgRepo> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await
        .ok()?;
    sqlx::migrate!("./migrations").run(&pool).await.ok()?;
    Some(PgRepo::new(pool))
}

fn fixture() -> Snapshot {
    let at = |day| Utc.with_ymd_and_hms(2024, 1, day, 9, 30, 0).unwrap();
    Snapshot {
        categories: vec![Category { id: 10, name: "ABAP".into(), description: None }],
        tags: vec![Tag { id: 20, name: "sap".into() }],
        posts: vec![
            Post { id: 30, title: "Hello".into(), content: "<p>about data</p>".into(), date_posted: at(1), views: 2, category_id: Some(10) },
            Post { id: 31, title: "Other".into(), content: "<p>database</p>".into(), date_posted: at(2), views: 0, category_id: None },
        ],
        links: vec![(30, 20)],
    }
}

#[tokio::test]
#[serial]
async fn replace_all_then_snapshot() {
    let Some(repo) = pg_repo().await else { eprintln!("skip: no DATABASE_URL"); return; };
    repo.replace_all(fixture()).await.unwrap();
    assert_eq!(repo.snapshot().await.unwrap(), fixture());
    assert_eq!(repo.get_post(30).await.unwrap().tag_names(), vec!["sap".to_string()]);
    assert_eq!(repo.list_categories().await.unwrap()[0].post_count, 1);
}

#[tokio::test]
#[serial]
async fn sequences_move_past_restored_ids() {
    let Some(repo) = pg_repo().await else { eprintln!("skip: no DATABASE_URL"); return; };
    repo.replace_all(fixture()).await.unwrap();
    let repairs = repo.repair_sequences().await.unwrap();
    assert!(repairs.iter().any(|r| r.entity == "post" && r.outcome == SequenceOutcome::Advanced { next_id: 32 }));
    let created = repo
        .create_post(NewPost { title: "New".into(), content: "<p>x</p>".into(), category_id: Some(10), tags: vec![20] })
        .await
        .unwrap();
    assert_eq!(created.post.id, 32);
    repo.delete_tag(20).await.unwrap();
    assert!(repo.get_post(32).await.unwrap().tags.is_empty());
}

#[tokio::test]
#[serial]
async fn search_matches_in_memory_semantics() {
    let Some(repo) = pg_repo().await else { eprintln!("skip: no DATABASE_URL"); return; };
    repo.replace_all(fixture()).await.unwrap();
    let all = repo.list_posts(&PostFilter::default(), None).await.unwrap();
    assert_eq!(all.posts.iter().map(|v| v.post.id).collect::<Vec<_>>(), vec![31, 30]);

    let params = SearchParams { q: Some("data".into()), ..Default::default() };
    let page = search(&repo, &params, "Admin").await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.posts[0].id, "30");

    repo.delete_category(10).await.unwrap();
    assert_eq!(repo.get_post(30).await.unwrap().post.category_id, None);
}
