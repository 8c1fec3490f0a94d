use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::text;

pub type Id = i64;

/// Category name shown for posts without one.
pub const UNCATEGORIZED: &str = "Uncategorized";
/// Category created on first start so posts always have somewhere to go.
pub const DEFAULT_CATEGORY: &str = "General";
pub const DEFAULT_CATEGORY_DESCRIPTION: &str = "General topics";
/// Accent colour the frontend renders category badges with.
pub const CATEGORY_COLOR: &str = "#0A6ED1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Category {
    pub id: Id,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewCategory {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Tag {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewTag {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Post {
    pub id: Id,
    pub title: String,
    pub content: String, // rich-text markup
    pub date_posted: DateTime<Utc>,
    pub views: i64,
    pub category_id: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub category_id: Option<Id>,
    #[serde(default)]
    pub tags: Vec<Id>,
}

/// A post joined with its category name and tag set.
#[derive(Debug, Clone, PartialEq)]
pub struct PostView {
    pub post: Post,
    pub category_name: Option<String>,
    pub tags: Vec<Tag>,
}

impl PostView {
    pub fn tag_names(&self) -> Vec<String> {
        self.tags.iter().map(|t| t.name.clone()).collect()
    }

    pub fn category_label(&self) -> String {
        self.category_name.clone().unwrap_or_else(|| UNCATEGORIZED.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryWithCount {
    pub category: Category,
    pub post_count: i64,
}

// ---------------- API projections ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostSummary {
    pub id: String,
    pub title: String,
    pub excerpt: String,
    pub date: String,
    pub author: String,
    pub tags: Vec<String>,
    pub category: String,
}

impl PostSummary {
    pub fn project(view: &PostView, author: &str) -> Self {
        Self {
            id: view.post.id.to_string(),
            title: view.post.title.clone(),
            excerpt: text::excerpt(&view.post.content),
            date: text::format_date(&view.post.date_posted),
            author: author.to_string(),
            tags: view.tag_names(),
            category: view.category_label(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostDetail {
    pub id: String,
    pub title: String,
    pub content: String,
    pub date: String,
    pub author: String,
    pub tags: Vec<String>,
    pub category: String,
    pub views: i64,
}

impl PostDetail {
    pub fn project(view: &PostView, author: &str) -> Self {
        Self {
            id: view.post.id.to_string(),
            title: view.post.title.clone(),
            content: view.post.content.clone(),
            date: text::format_date(&view.post.date_posted),
            author: author.to_string(),
            tags: view.tag_names(),
            category: view.category_label(),
            views: view.post.views,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CategorySummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub count: i64,
    pub color: String,
}

impl From<CategoryWithCount> for CategorySummary {
    fn from(c: CategoryWithCount) -> Self {
        Self {
            id: c.category.id.to_string(),
            name: c.category.name,
            description: c.category.description.unwrap_or_default(),
            count: c.post_count,
            color: CATEGORY_COLOR.to_string(),
        }
    }
}

/// One page of post summaries plus the arithmetic the frontend paginates with.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostPage {
    pub posts: Vec<PostSummary>,
    pub total: u64,
    pub pages: u64,
    pub current_page: u64,
    pub per_page: u64,
}
