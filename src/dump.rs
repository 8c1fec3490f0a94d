//! JSON dump of the whole content model, and the destructive restore from it.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::auth::AdminContext;
use crate::error::ApiError;
use crate::models::{Category, Id, Post, Tag};
use crate::repo::{Repo, SequenceOutcome, SequenceRepair, Snapshot};

/// The interchange format. Field names and shapes are a stable contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Dump {
    #[serde(default)]
    pub categories: Vec<DumpCategory>,
    #[serde(default)]
    pub tags: Vec<DumpTag>,
    #[serde(default)]
    pub posts: Vec<DumpPost>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DumpCategory {
    pub id: Id,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DumpTag {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DumpPost {
    pub id: Id,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub views: i64,
    /// Day only; time of day does not survive a dump.
    pub date_posted: NaiveDate,
    #[serde(default)]
    pub category_id: Option<Id>,
    /// Tag names, resolved against `tags` on restore.
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct RestoreReport {
    pub categories: usize,
    pub tags: usize,
    pub posts: usize,
    pub links: usize,
    /// Post tag names with no matching tag in the dump.
    pub dropped_tag_links: usize,
    /// Posts whose category was not in the dump and were restored without one.
    pub detached_categories: usize,
    #[schema(value_type = Vec<Object>)]
    pub sequences: Vec<SequenceRepair>,
}

pub fn snapshot_to_dump(snapshot: &Snapshot) -> Dump {
    let tag_names: HashMap<Id, &str> = snapshot.tags.iter().map(|t| (t.id, t.name.as_str())).collect();
    let mut post_tags: HashMap<Id, Vec<String>> = HashMap::new();
    for (post_id, tag_id) in &snapshot.links {
        if let Some(name) = tag_names.get(tag_id) {
            post_tags.entry(*post_id).or_default().push(name.to_string());
        }
    }
    Dump {
        categories: snapshot
            .categories
            .iter()
            .map(|c| DumpCategory { id: c.id, name: c.name.clone(), description: c.description.clone() })
            .collect(),
        tags: snapshot.tags.iter().map(|t| DumpTag { id: t.id, name: t.name.clone() }).collect(),
        posts: snapshot
            .posts
            .iter()
            .map(|p| DumpPost {
                id: p.id,
                title: p.title.clone(),
                content: p.content.clone(),
                views: p.views,
                date_posted: p.date_posted.date_naive(),
                category_id: p.category_id,
                tags: post_tags.remove(&p.id).unwrap_or_default(),
            })
            .collect(),
    }
}

pub async fn export_dump(repo: &dyn Repo, ctx: &AdminContext) -> Result<Dump, ApiError> {
    ctx.ensure_admin()?;
    let snapshot = repo.snapshot().await?;
    let dump = snapshot_to_dump(&snapshot);
    info!(categories = dump.categories.len(), tags = dump.tags.len(), posts = dump.posts.len(), "dump exported");
    Ok(dump)
}

/// Pretty JSON, four-space indent, non-ASCII kept as is.
pub fn to_json(dump: &Dump) -> Result<Vec<u8>, ApiError> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    dump.serialize(&mut ser).map_err(|e| {
        tracing::error!("failed to encode dump: {e}");
        ApiError::Internal
    })?;
    Ok(out)
}

pub fn parse_dump(raw: &[u8]) -> Result<Dump, ApiError> {
    serde_json::from_slice(raw).map_err(|e| ApiError::bad_request(format!("malformed dump: {e}")))
}

fn check_unique<'a>(what: &str, ids: impl Iterator<Item = (Id, &'a str)>) -> Result<(), ApiError> {
    let mut seen_ids = HashSet::new();
    let mut seen_names = HashSet::new();
    for (id, name) in ids {
        if name.trim().is_empty() {
            return Err(ApiError::bad_request(format!("{what} {id} has an empty name")));
        }
        if !seen_ids.insert(id) {
            return Err(ApiError::bad_request(format!("duplicate {what} id {id}")));
        }
        if !seen_names.insert(name) {
            return Err(ApiError::bad_request(format!("duplicate {what} name '{name}'")));
        }
    }
    Ok(())
}

/// Rejects dumps that could not be inserted, before anything is cleared.
pub fn validate(dump: &Dump) -> Result<(), ApiError> {
    check_unique("category", dump.categories.iter().map(|c| (c.id, c.name.as_str())))?;
    check_unique("tag", dump.tags.iter().map(|t| (t.id, t.name.as_str())))?;
    let mut post_ids = HashSet::new();
    for p in &dump.posts {
        if !post_ids.insert(p.id) {
            return Err(ApiError::bad_request(format!("duplicate post id {}", p.id)));
        }
        if p.title.trim().is_empty() || p.content.trim().is_empty() {
            return Err(ApiError::bad_request(format!("post {} has an empty title or content", p.id)));
        }
    }
    Ok(())
}

/// Turns a validated dump into rows, relinking tags by name and dropping
/// category references the dump cannot satisfy.
pub fn plan_restore(dump: Dump) -> (Snapshot, RestoreReport) {
    let mut report = RestoreReport::default();
    let category_ids: HashSet<Id> = dump.categories.iter().map(|c| c.id).collect();
    let tag_ids: HashMap<&str, Id> = dump.tags.iter().map(|t| (t.name.as_str(), t.id)).collect();

    let mut posts = Vec::with_capacity(dump.posts.len());
    let mut links = BTreeSet::new();
    for p in &dump.posts {
        let category_id = match p.category_id {
            Some(cid) if !category_ids.contains(&cid) => {
                warn!(post_id = p.id, category_id = cid, "category missing from dump; restoring post without one");
                report.detached_categories += 1;
                None
            }
            other => other,
        };
        for name in &p.tags {
            match tag_ids.get(name.as_str()) {
                Some(&tag_id) => {
                    links.insert((p.id, tag_id));
                }
                None => {
                    warn!(post_id = p.id, tag = %name, "tag missing from dump; association dropped");
                    report.dropped_tag_links += 1;
                }
            }
        }
        posts.push(Post {
            id: p.id,
            title: p.title.clone(),
            content: p.content.clone(),
            date_posted: p.date_posted.and_time(NaiveTime::MIN).and_utc(),
            views: p.views.max(0),
            category_id,
        });
    }

    let snapshot = Snapshot {
        categories: dump
            .categories
            .into_iter()
            .map(|c| Category { id: c.id, name: c.name, description: c.description })
            .collect(),
        tags: dump.tags.into_iter().map(|t| Tag { id: t.id, name: t.name }).collect(),
        posts,
        links: links.into_iter().collect(),
    };
    report.categories = snapshot.categories.len();
    report.tags = snapshot.tags.len();
    report.posts = snapshot.posts.len();
    report.links = snapshot.links.len();
    (snapshot, report)
}

/// Replaces the whole content model with the dump in `raw`.
///
/// Nothing is touched unless the caller is admin and the dump parses and
/// validates. Sequence repair runs afterwards and never fails the restore.
pub async fn restore_dump(repo: &dyn Repo, ctx: &AdminContext, raw: &[u8]) -> Result<RestoreReport, ApiError> {
    ctx.ensure_admin()?;
    let dump = parse_dump(raw)?;
    validate(&dump)?;
    let (snapshot, mut report) = plan_restore(dump);
    info!(
        categories = report.categories,
        tags = report.tags,
        posts = report.posts,
        by = ctx.subject(),
        "restoring dump"
    );
    repo.replace_all(snapshot).await.map_err(|e| {
        tracing::error!("restore failed: {e}");
        ApiError::from(e)
    })?;
    report.sequences = repair_sequences(repo).await;
    info!(links = report.links, dropped = report.dropped_tag_links, "restore finished");
    Ok(report)
}

/// Standalone sequence repair for ids inserted out of band.
pub async fn fix_sequences(repo: &dyn Repo, ctx: &AdminContext) -> Result<Vec<SequenceRepair>, ApiError> {
    ctx.ensure_admin()?;
    Ok(repair_sequences(repo).await)
}

async fn repair_sequences(repo: &dyn Repo) -> Vec<SequenceRepair> {
    let repairs = match repo.repair_sequences().await {
        Ok(r) => r,
        Err(e) => {
            warn!("sequence repair unavailable: {e}");
            return Vec::new();
        }
    };
    for r in &repairs {
        match &r.outcome {
            SequenceOutcome::Advanced { next_id } => info!(entity = r.entity, next_id, "sequence repaired"),
            SequenceOutcome::Unsupported { reason } => warn!(entity = r.entity, %reason, "sequence repair skipped"),
        }
    }
    repairs
}
