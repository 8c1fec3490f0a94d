use async_trait::async_trait;
use serde::Serialize;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict: {0}")] Conflict(String),
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Which posts a listing covers.
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub category_id: Option<Id>,
    /// Case-insensitive literal substring of the title or the raw content.
    pub contains: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: u64,
    pub limit: u64,
}

/// Posts newest first, plus the number of matches before windowing.
#[derive(Debug, Clone)]
pub struct PostListing {
    pub posts: Vec<PostView>,
    pub total: u64,
}

/// Full copy of the content model, rows in id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub categories: Vec<Category>,
    pub tags: Vec<Tag>,
    pub posts: Vec<Post>,
    /// `(post_id, tag_id)` association rows.
    pub links: Vec<(Id, Id)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SequenceOutcome {
    Advanced { next_id: Id },
    Unsupported { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceRepair {
    pub entity: &'static str,
    #[serde(flatten)]
    pub outcome: SequenceOutcome,
}

#[async_trait]
pub trait CategoryRepo: Send + Sync {
    async fn list_categories(&self) -> RepoResult<Vec<CategoryWithCount>>;
    async fn get_category(&self, id: Id) -> RepoResult<Category>;
    /// Case-insensitive exact name lookup.
    async fn find_category_by_name(&self, name: &str) -> RepoResult<Option<Category>>;
    async fn create_category(&self, new: NewCategory) -> RepoResult<Category>;
    /// Returns how many posts lost their category.
    async fn delete_category(&self, id: Id) -> RepoResult<u64>;
    async fn ensure_default_category(&self) -> RepoResult<()>;
}

#[async_trait]
pub trait TagRepo: Send + Sync {
    async fn list_tags(&self) -> RepoResult<Vec<Tag>>;
    async fn create_tag(&self, new: NewTag) -> RepoResult<Tag>;
    async fn delete_tag(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    /// Newest first (`date_posted` desc, then id desc). Count and window are read together.
    async fn list_posts(&self, filter: &PostFilter, window: Option<Window>) -> RepoResult<PostListing>;
    async fn get_post(&self, id: Id) -> RepoResult<PostView>;
    /// Increments the view counter and returns the updated post.
    async fn record_view(&self, id: Id) -> RepoResult<PostView>;
    /// Unknown tag ids are skipped.
    async fn create_post(&self, new: NewPost) -> RepoResult<PostView>;
    async fn delete_post(&self, id: Id) -> RepoResult<()>;
    async fn find_post_by_title(&self, title: &str) -> RepoResult<Option<Post>>;
}

#[async_trait]
pub trait BackupRepo: Send + Sync {
    async fn snapshot(&self) -> RepoResult<Snapshot>;
    /// Clears every table and inserts `snapshot` with its explicit ids, as one unit.
    /// Id sequences are left alone; see [`BackupRepo::repair_sequences`].
    async fn replace_all(&self, snapshot: Snapshot) -> RepoResult<()>;
    /// Moves each id sequence past the largest stored id.
    async fn repair_sequences(&self) -> RepoResult<Vec<SequenceRepair>>;
}

pub trait Repo: CategoryRepo + TagRepo + PostRepo + BackupRepo {}

impl<T> Repo for T where T: CategoryRepo + TagRepo + PostRepo + BackupRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::Deserialize;
    use std::cmp::Ordering;
    use std::collections::{BTreeMap, BTreeSet};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
    use tracing::{info, warn};

    /// Last id handed out per entity, like a database sequence.
    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    struct Sequences {
        category: Id,
        tag: Id,
        post: Id,
    }

    #[derive(Default, Clone, Serialize, Deserialize)]
    struct State {
        categories: BTreeMap<Id, Category>,
        tags: BTreeMap<Id, Tag>,
        posts: BTreeMap<Id, Post>,
        post_tags: BTreeSet<(Id, Id)>,
        sequences: Sequences,
    }

    impl State {
        fn view(&self, post: &Post) -> PostView {
            let category_name = post
                .category_id
                .and_then(|id| self.categories.get(&id))
                .map(|c| c.name.clone());
            let tags = self
                .post_tags
                .range((post.id, Id::MIN)..=(post.id, Id::MAX))
                .filter_map(|(_, tag_id)| self.tags.get(tag_id).cloned())
                .collect();
            PostView { post: post.clone(), category_name, tags }
        }
    }

    fn newest_first(a: &&Post, b: &&Post) -> Ordering {
        b.date_posted.cmp(&a.date_posted).then(b.id.cmp(&a.id))
    }

    // Explicit-id inserts don't move the counter, so a stale one can collide.
    fn allocate<V>(seq: &mut Id, taken: &BTreeMap<Id, V>, entity: &str) -> RepoResult<Id> {
        let next = seq
            .checked_add(1)
            .ok_or_else(|| RepoError::Conflict(format!("{entity} id space exhausted")))?;
        if taken.contains_key(&next) {
            return Err(RepoError::Conflict(format!("{entity} id {next} already exists")));
        }
        *seq = next;
        Ok(next)
    }

    fn to_usize(n: u64) -> usize {
        usize::try_from(n).unwrap_or(usize::MAX)
    }

    #[derive(Clone, Default)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        /// Volatile store; nothing touches the disk.
        pub fn new() -> Self {
            Self::default()
        }

        /// Store backed by `<dir>/state.json`, loaded now and rewritten after every change.
        pub fn persistent(dir: impl AsRef<Path>) -> Self {
            let path = dir.as_ref().join("state.json");
            let state = Self::load_state_from(&path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(path)),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        warn!("failed to parse snapshot '{}': {e}; starting empty", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    info!("no snapshot at '{}' ({e}); starting empty", path.display());
                    State::default()
                }
            }
        }

        fn persist(&self) {
            let Some(path) = self.snapshot_path.as_deref() else { return };
            let bytes = match self.read().map(|s| serde_json::to_vec_pretty(&*s)) {
                Ok(Ok(b)) => b,
                Ok(Err(e)) => { warn!("failed to encode snapshot: {e}"); return; }
                Err(e) => { warn!("failed to read state for snapshot: {e}"); return; }
            };
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            if let Err(e) = std::fs::write(path, bytes) {
                warn!("failed to write snapshot '{}': {e}", path.display());
            }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }
    }

    #[async_trait]
    impl CategoryRepo for InMemRepo {
        async fn list_categories(&self) -> RepoResult<Vec<CategoryWithCount>> {
            let s = self.read()?;
            Ok(s.categories
                .values()
                .map(|c| CategoryWithCount {
                    category: c.clone(),
                    post_count: s.posts.values().filter(|p| p.category_id == Some(c.id)).count() as i64,
                })
                .collect())
        }

        async fn get_category(&self, id: Id) -> RepoResult<Category> {
            self.read()?.categories.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn find_category_by_name(&self, name: &str) -> RepoResult<Option<Category>> {
            let wanted = name.to_lowercase();
            Ok(self.read()?.categories.values().find(|c| c.name.to_lowercase() == wanted).cloned())
        }

        async fn create_category(&self, new: NewCategory) -> RepoResult<Category> {
            let mut s = self.write()?;
            if s.categories.values().any(|c| c.name == new.name) {
                return Err(RepoError::Conflict(format!("category '{}' already exists", new.name)));
            }
            let state = &mut *s;
            let id = allocate(&mut state.sequences.category, &state.categories, "category")?;
            let category = Category { id, name: new.name, description: new.description };
            state.categories.insert(id, category.clone());
            drop(s);
            self.persist();
            Ok(category)
        }

        async fn delete_category(&self, id: Id) -> RepoResult<u64> {
            let mut s = self.write()?;
            if s.categories.remove(&id).is_none() {
                return Err(RepoError::NotFound);
            }
            let mut detached = 0;
            for post in s.posts.values_mut().filter(|p| p.category_id == Some(id)) {
                post.category_id = None;
                detached += 1;
            }
            drop(s);
            self.persist();
            Ok(detached)
        }

        async fn ensure_default_category(&self) -> RepoResult<()> {
            if !self.read()?.categories.is_empty() {
                return Ok(());
            }
            self.create_category(NewCategory {
                name: DEFAULT_CATEGORY.into(),
                description: Some(DEFAULT_CATEGORY_DESCRIPTION.into()),
            })
            .await
            .map(|_| ())
        }
    }

    #[async_trait]
    impl TagRepo for InMemRepo {
        async fn list_tags(&self) -> RepoResult<Vec<Tag>> {
            Ok(self.read()?.tags.values().cloned().collect())
        }

        async fn create_tag(&self, new: NewTag) -> RepoResult<Tag> {
            let mut s = self.write()?;
            if s.tags.values().any(|t| t.name == new.name) {
                return Err(RepoError::Conflict(format!("tag '{}' already exists", new.name)));
            }
            let state = &mut *s;
            let id = allocate(&mut state.sequences.tag, &state.tags, "tag")?;
            let tag = Tag { id, name: new.name };
            state.tags.insert(id, tag.clone());
            drop(s);
            self.persist();
            Ok(tag)
        }

        async fn delete_tag(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            if s.tags.remove(&id).is_none() {
                return Err(RepoError::NotFound);
            }
            s.post_tags.retain(|&(_, tag_id)| tag_id != id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn list_posts(&self, filter: &PostFilter, window: Option<Window>) -> RepoResult<PostListing> {
            let s = self.read()?;
            let needle = filter.contains.as_ref().map(|q| q.to_lowercase());
            let mut matched: Vec<&Post> = s
                .posts
                .values()
                .filter(|p| filter.category_id.map_or(true, |c| p.category_id == Some(c)))
                .filter(|p| {
                    needle.as_ref().map_or(true, |n| {
                        p.title.to_lowercase().contains(n) || p.content.to_lowercase().contains(n)
                    })
                })
                .collect();
            matched.sort_by(newest_first);
            let total = matched.len() as u64;
            let posts = match window {
                Some(w) => matched
                    .into_iter()
                    .skip(to_usize(w.offset))
                    .take(to_usize(w.limit))
                    .map(|p| s.view(p))
                    .collect(),
                None => matched.into_iter().map(|p| s.view(p)).collect(),
            };
            Ok(PostListing { posts, total })
        }

        async fn get_post(&self, id: Id) -> RepoResult<PostView> {
            let s = self.read()?;
            s.posts.get(&id).map(|p| s.view(p)).ok_or(RepoError::NotFound)
        }

        async fn record_view(&self, id: Id) -> RepoResult<PostView> {
            let mut s = self.write()?;
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            post.views += 1;
            let post = post.clone();
            let view = s.view(&post);
            drop(s);
            self.persist();
            Ok(view)
        }

        async fn create_post(&self, new: NewPost) -> RepoResult<PostView> {
            let mut s = self.write()?;
            if let Some(cid) = new.category_id {
                if !s.categories.contains_key(&cid) {
                    return Err(RepoError::NotFound);
                }
            }
            let state = &mut *s;
            let id = allocate(&mut state.sequences.post, &state.posts, "post")?;
            let post = Post {
                id,
                title: new.title,
                content: new.content,
                date_posted: Utc::now(),
                views: 0,
                category_id: new.category_id,
            };
            state.posts.insert(id, post.clone());
            for tag_id in new.tags {
                if state.tags.contains_key(&tag_id) {
                    state.post_tags.insert((id, tag_id));
                }
            }
            let view = state.view(&post);
            drop(s);
            self.persist();
            Ok(view)
        }

        async fn delete_post(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            if s.posts.remove(&id).is_none() {
                return Err(RepoError::NotFound);
            }
            s.post_tags.retain(|&(post_id, _)| post_id != id);
            drop(s);
            self.persist();
            Ok(())
        }

        async fn find_post_by_title(&self, title: &str) -> RepoResult<Option<Post>> {
            Ok(self.read()?.posts.values().find(|p| p.title == title).cloned())
        }
    }

    #[async_trait]
    impl BackupRepo for InMemRepo {
        async fn snapshot(&self) -> RepoResult<Snapshot> {
            let s = self.read()?;
            Ok(Snapshot {
                categories: s.categories.values().cloned().collect(),
                tags: s.tags.values().cloned().collect(),
                posts: s.posts.values().cloned().collect(),
                links: s.post_tags.iter().copied().collect(),
            })
        }

        async fn replace_all(&self, snapshot: Snapshot) -> RepoResult<()> {
            let mut next = State::default();
            for c in snapshot.categories {
                if next.categories.insert(c.id, c).is_some() {
                    return Err(RepoError::Conflict("duplicate category id".into()));
                }
            }
            for t in snapshot.tags {
                if next.tags.insert(t.id, t).is_some() {
                    return Err(RepoError::Conflict("duplicate tag id".into()));
                }
            }
            for p in snapshot.posts {
                if p.category_id.is_some_and(|c| !next.categories.contains_key(&c)) {
                    return Err(RepoError::Conflict(format!("post {} references a missing category", p.id)));
                }
                if next.posts.insert(p.id, p).is_some() {
                    return Err(RepoError::Conflict("duplicate post id".into()));
                }
            }
            for (post_id, tag_id) in snapshot.links {
                if !next.posts.contains_key(&post_id) || !next.tags.contains_key(&tag_id) {
                    return Err(RepoError::Conflict(format!("dangling link ({post_id}, {tag_id})")));
                }
                next.post_tags.insert((post_id, tag_id));
            }
            let mut s = self.write()?;
            next.sequences = s.sequences.clone();
            *s = next;
            drop(s);
            self.persist();
            Ok(())
        }

        async fn repair_sequences(&self) -> RepoResult<Vec<SequenceRepair>> {
            let mut s = self.write()?;
            let state = &mut *s;
            let max_of = |keys: Option<&Id>| keys.copied().unwrap_or(0);
            state.sequences.category = max_of(state.categories.keys().next_back());
            state.sequences.tag = max_of(state.tags.keys().next_back());
            state.sequences.post = max_of(state.posts.keys().next_back());
            let repair = |entity: &'static str, last: Id| SequenceRepair {
                entity,
                outcome: match last.checked_add(1) {
                    Some(next_id) => SequenceOutcome::Advanced { next_id },
                    None => SequenceOutcome::Unsupported { reason: "id space exhausted".into() },
                },
            };
            let report = vec![
                repair("category", state.sequences.category),
                repair("tag", state.sequences.tag),
                repair("post", state.sequences.post),
            ];
            drop(s);
            self.persist();
            Ok(report)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use chrono::{DateTime, Utc};
    use sqlx::{PgConnection, Pool, Postgres};
    use std::collections::HashMap;

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
    }

    fn db_err(e: sqlx::Error) -> RepoError {
        match &e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(d) if d.is_unique_violation() => RepoError::Conflict(d.message().to_string()),
            sqlx::Error::Database(d) if d.is_foreign_key_violation() => RepoError::NotFound,
            _ => RepoError::Internal(e.to_string()),
        }
    }

    #[derive(sqlx::FromRow)]
    struct PostRow {
        id: Id,
        title: String,
        content: String,
        date_posted: DateTime<Utc>,
        views: i64,
        category_id: Option<Id>,
        category_name: Option<String>,
    }

    const POST_SELECT: &str = r#"
        SELECT p.id, p.title, p.content, p.date_posted, p.views, p.category_id, c.name AS category_name
        FROM posts p
        LEFT JOIN categories c ON c.id = p.category_id
    "#;

    const POST_FILTER: &str = r#"
        WHERE ($1::BIGINT IS NULL OR p.category_id = $1)
          AND ($2::TEXT IS NULL
               OR strpos(lower(p.title), lower($2)) > 0
               OR strpos(lower(p.content), lower($2)) > 0)
    "#;

    async fn with_tags(conn: &mut PgConnection, rows: Vec<PostRow>) -> RepoResult<Vec<PostView>> {
        let ids: Vec<Id> = rows.iter().map(|r| r.id).collect();
        let links = sqlx::query_as::<_, (Id, Id, String)>(
            "SELECT pt.post_id, t.id, t.name FROM post_tags pt JOIN tags t ON t.id = pt.tag_id WHERE pt.post_id = ANY($1) ORDER BY t.id",
        )
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_err)?;
        let mut by_post: HashMap<Id, Vec<Tag>> = HashMap::new();
        for (post_id, id, name) in links {
            by_post.entry(post_id).or_default().push(Tag { id, name });
        }
        Ok(rows
            .into_iter()
            .map(|r| PostView {
                tags: by_post.remove(&r.id).unwrap_or_default(),
                category_name: r.category_name,
                post: Post {
                    id: r.id,
                    title: r.title,
                    content: r.content,
                    date_posted: r.date_posted,
                    views: r.views,
                    category_id: r.category_id,
                },
            })
            .collect())
    }

    async fn fetch_view(conn: &mut PgConnection, id: Id) -> RepoResult<PostView> {
        let row = sqlx::query_as::<_, PostRow>(&format!("{POST_SELECT} WHERE p.id = $1"))
            .bind(id)
            .fetch_one(&mut *conn)
            .await
            .map_err(db_err)?;
        with_tags(conn, vec![row]).await?.pop().ok_or(RepoError::NotFound)
    }

    #[async_trait]
    impl CategoryRepo for PgRepo {
        async fn list_categories(&self) -> RepoResult<Vec<CategoryWithCount>> {
            let rows = sqlx::query_as::<_, (Id, String, Option<String>, i64)>(r#"
                SELECT c.id, c.name, c.description, COUNT(p.id)
                FROM categories c LEFT JOIN posts p ON p.category_id = c.id
                GROUP BY c.id ORDER BY c.id
            "#)
            .fetch_all(&self.pool).await.map_err(db_err)?;
            Ok(rows
                .into_iter()
                .map(|(id, name, description, post_count)| CategoryWithCount {
                    category: Category { id, name, description },
                    post_count,
                })
                .collect())
        }
        async fn get_category(&self, id: Id) -> RepoResult<Category> {
            sqlx::query_as::<_, Category>("SELECT id, name, description FROM categories WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn find_category_by_name(&self, name: &str) -> RepoResult<Option<Category>> {
            sqlx::query_as::<_, Category>("SELECT id, name, description FROM categories WHERE lower(name) = lower($1) ORDER BY id LIMIT 1")
                .bind(name)
                .fetch_optional(&self.pool).await.map_err(db_err)
        }
        async fn create_category(&self, new: NewCategory) -> RepoResult<Category> {
            sqlx::query_as::<_, Category>("INSERT INTO categories (name, description) VALUES ($1, $2) RETURNING id, name, description")
                .bind(&new.name).bind(&new.description)
                .fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn delete_category(&self, id: Id) -> RepoResult<u64> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let detached = sqlx::query("UPDATE posts SET category_id = NULL WHERE category_id = $1")
                .bind(id)
                .execute(&mut *tx).await.map_err(db_err)?
                .rows_affected();
            let deleted = sqlx::query("DELETE FROM categories WHERE id = $1")
                .bind(id)
                .execute(&mut *tx).await.map_err(db_err)?
                .rows_affected();
            if deleted == 0 { return Err(RepoError::NotFound); }
            tx.commit().await.map_err(db_err)?;
            Ok(detached)
        }
        async fn ensure_default_category(&self) -> RepoResult<()> {
            sqlx::query("INSERT INTO categories (name, description) SELECT $1, $2 WHERE NOT EXISTS (SELECT 1 FROM categories)")
                .bind(DEFAULT_CATEGORY).bind(DEFAULT_CATEGORY_DESCRIPTION)
                .execute(&self.pool).await.map_err(db_err)?;
            Ok(())
        }
    }

    #[async_trait]
    impl TagRepo for PgRepo {
        async fn list_tags(&self) -> RepoResult<Vec<Tag>> {
            sqlx::query_as::<_, Tag>("SELECT id, name FROM tags ORDER BY id")
                .fetch_all(&self.pool).await.map_err(db_err)
        }
        async fn create_tag(&self, new: NewTag) -> RepoResult<Tag> {
            sqlx::query_as::<_, Tag>("INSERT INTO tags (name) VALUES ($1) RETURNING id, name")
                .bind(&new.name)
                .fetch_one(&self.pool).await.map_err(db_err)
        }
        async fn delete_tag(&self, id: Id) -> RepoResult<()> {
            // post_tags rows go with it (ON DELETE CASCADE)
            let deleted = sqlx::query("DELETE FROM tags WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await.map_err(db_err)?
                .rows_affected();
            if deleted == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn list_posts(&self, filter: &PostFilter, window: Option<Window>) -> RepoResult<PostListing> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
                .execute(&mut *tx).await.map_err(db_err)?;
            let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM posts p {POST_FILTER}"))
                .bind(filter.category_id)
                .bind(filter.contains.as_deref())
                .fetch_one(&mut *tx).await.map_err(db_err)?;
            let limit = window.map(|w| i64::try_from(w.limit).unwrap_or(i64::MAX));
            let offset = window.map_or(0, |w| i64::try_from(w.offset).unwrap_or(i64::MAX));
            let rows = sqlx::query_as::<_, PostRow>(&format!(
                "{POST_SELECT} {POST_FILTER} ORDER BY p.date_posted DESC, p.id DESC LIMIT $3 OFFSET $4"
            ))
            .bind(filter.category_id)
            .bind(filter.contains.as_deref())
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *tx).await.map_err(db_err)?;
            let posts = with_tags(&mut tx, rows).await?;
            tx.commit().await.map_err(db_err)?;
            Ok(PostListing { posts, total: total.max(0) as u64 })
        }
        async fn get_post(&self, id: Id) -> RepoResult<PostView> {
            let mut conn = self.pool.acquire().await.map_err(db_err)?;
            fetch_view(&mut conn, id).await
        }
        async fn record_view(&self, id: Id) -> RepoResult<PostView> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let updated = sqlx::query("UPDATE posts SET views = views + 1 WHERE id = $1")
                .bind(id)
                .execute(&mut *tx).await.map_err(db_err)?
                .rows_affected();
            if updated == 0 { return Err(RepoError::NotFound); }
            let view = fetch_view(&mut tx, id).await?;
            tx.commit().await.map_err(db_err)?;
            Ok(view)
        }
        async fn create_post(&self, new: NewPost) -> RepoResult<PostView> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let id: Id = sqlx::query_scalar(
                "INSERT INTO posts (title, content, category_id) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(&new.title).bind(&new.content).bind(new.category_id)
            .fetch_one(&mut *tx).await.map_err(db_err)?;
            sqlx::query("INSERT INTO post_tags (post_id, tag_id) SELECT $1, id FROM tags WHERE id = ANY($2)")
                .bind(id).bind(&new.tags)
                .execute(&mut *tx).await.map_err(db_err)?;
            let view = fetch_view(&mut tx, id).await?;
            tx.commit().await.map_err(db_err)?;
            Ok(view)
        }
        async fn delete_post(&self, id: Id) -> RepoResult<()> {
            let deleted = sqlx::query("DELETE FROM posts WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await.map_err(db_err)?
                .rows_affected();
            if deleted == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
        async fn find_post_by_title(&self, title: &str) -> RepoResult<Option<Post>> {
            sqlx::query_as::<_, Post>("SELECT id, title, content, date_posted, views, category_id FROM posts WHERE title = $1 ORDER BY id LIMIT 1")
                .bind(title)
                .fetch_optional(&self.pool).await.map_err(db_err)
        }
    }

    #[async_trait]
    impl BackupRepo for PgRepo {
        async fn snapshot(&self) -> RepoResult<Snapshot> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
                .execute(&mut *tx).await.map_err(db_err)?;
            let categories = sqlx::query_as::<_, Category>("SELECT id, name, description FROM categories ORDER BY id")
                .fetch_all(&mut *tx).await.map_err(db_err)?;
            let tags = sqlx::query_as::<_, Tag>("SELECT id, name FROM tags ORDER BY id")
                .fetch_all(&mut *tx).await.map_err(db_err)?;
            let posts = sqlx::query_as::<_, Post>("SELECT id, title, content, date_posted, views, category_id FROM posts ORDER BY id")
                .fetch_all(&mut *tx).await.map_err(db_err)?;
            let links = sqlx::query_as::<_, (Id, Id)>("SELECT post_id, tag_id FROM post_tags ORDER BY post_id, tag_id")
                .fetch_all(&mut *tx).await.map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(Snapshot { categories, tags, posts, links })
        }

        async fn replace_all(&self, snapshot: Snapshot) -> RepoResult<()> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            // association rows first, then children before parents
            for stmt in ["DELETE FROM post_tags", "DELETE FROM posts", "DELETE FROM categories", "DELETE FROM tags"] {
                sqlx::query(stmt).execute(&mut *tx).await.map_err(db_err)?;
            }
            for c in &snapshot.categories {
                sqlx::query("INSERT INTO categories (id, name, description) VALUES ($1, $2, $3)")
                    .bind(c.id).bind(&c.name).bind(&c.description)
                    .execute(&mut *tx).await.map_err(db_err)?;
            }
            for t in &snapshot.tags {
                sqlx::query("INSERT INTO tags (id, name) VALUES ($1, $2)")
                    .bind(t.id).bind(&t.name)
                    .execute(&mut *tx).await.map_err(db_err)?;
            }
            for p in &snapshot.posts {
                sqlx::query("INSERT INTO posts (id, title, content, date_posted, views, category_id) VALUES ($1, $2, $3, $4, $5, $6)")
                    .bind(p.id).bind(&p.title).bind(&p.content).bind(p.date_posted).bind(p.views).bind(p.category_id)
                    .execute(&mut *tx).await.map_err(db_err)?;
            }
            for (post_id, tag_id) in &snapshot.links {
                sqlx::query("INSERT INTO post_tags (post_id, tag_id) VALUES ($1, $2)")
                    .bind(post_id).bind(tag_id)
                    .execute(&mut *tx).await.map_err(db_err)?;
            }
            tx.commit().await.map_err(db_err)?;
            Ok(())
        }

        async fn repair_sequences(&self) -> RepoResult<Vec<SequenceRepair>> {
            let mut report = Vec::new();
            for (entity, table) in [("category", "categories"), ("tag", "tags"), ("post", "posts")] {
                let sql = format!(
                    "SELECT setval(pg_get_serial_sequence('{table}', 'id'), COALESCE((SELECT MAX(id) FROM {table}), 0) + 1, false)"
                );
                let outcome = match sqlx::query_scalar::<_, Option<i64>>(&sql).fetch_one(&self.pool).await {
                    Ok(Some(next_id)) => SequenceOutcome::Advanced { next_id },
                    Ok(None) => SequenceOutcome::Unsupported { reason: format!("no sequence owns {table}.id") },
                    Err(e) => SequenceOutcome::Unsupported { reason: e.to_string() },
                };
                report.push(SequenceRepair { entity, outcome });
            }
            Ok(report)
        }
    }
}
