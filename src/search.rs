//! Post listing: category filter, free-text search and pagination.

use serde::Deserialize;
use utoipa::IntoParams;

use crate::error::ApiError;
use crate::models::{PostPage, PostSummary, PostView};
use crate::repo::{PostFilter, Repo, Window};
use crate::text::QueryMatcher;

pub const DEFAULT_PER_PAGE: u64 = 10;
/// Upper bound for `per_page`. Larger requests are clamped, and `pages` is
/// computed from the clamped value.
pub const MAX_PER_PAGE: u64 = 100;

/// Query string of `GET /api/posts`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchParams {
    /// Free-text query; blank means no query.
    pub q: Option<String>,
    /// Category slug, e.g. `web-development`.
    pub category: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

/// 1-indexed page arithmetic, used for store windows and in-memory slices alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub per_page: u64,
}

impl Pagination {
    pub fn new(page: Option<u64>, per_page: Option<u64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.per_page)
    }

    pub fn window(&self) -> Window {
        Window { offset: self.offset(), limit: self.per_page }
    }

    pub fn page_count(&self, total: u64) -> u64 {
        total.div_ceil(self.per_page)
    }

    /// The current page's slice of an already ordered list.
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = usize::try_from(self.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(self.per_page).unwrap_or(usize::MAX);
        items.into_iter().skip(offset).take(limit).collect()
    }
}

impl SearchParams {
    fn query(&self) -> Option<&str> {
        self.q.as_deref().filter(|q| !q.trim().is_empty())
    }

    fn category_name(&self) -> Option<String> {
        self.category
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(|slug| slug.replace('-', " "))
    }
}

/// Runs a listing and projects each hit to a summary credited to `author`.
pub async fn search(repo: &dyn Repo, params: &SearchParams, author: &str) -> Result<PostPage, ApiError> {
    let pagination = Pagination::new(params.page, params.per_page);
    let (posts, total) = find_posts(repo, params, pagination).await?;
    Ok(PostPage {
        posts: posts.iter().map(|v| PostSummary::project(v, author)).collect(),
        total,
        pages: pagination.page_count(total),
        current_page: pagination.page,
        per_page: pagination.per_page,
    })
}

async fn find_posts(
    repo: &dyn Repo,
    params: &SearchParams,
    pagination: Pagination,
) -> Result<(Vec<PostView>, u64), ApiError> {
    let mut filter = PostFilter::default();

    if let Some(name) = params.category_name() {
        match repo.find_category_by_name(&name).await? {
            Some(category) => filter.category_id = Some(category.id),
            None => {
                tracing::debug!(category = %name, "unknown category; empty listing");
                return Ok((Vec::new(), 0));
            }
        }
    }

    let Some(query) = params.query() else {
        let listing = repo.list_posts(&filter, Some(pagination.window())).await?;
        return Ok((listing.posts, listing.total));
    };

    // Coarse substring pass in the store, word-boundary refinement here.
    filter.contains = Some(query.to_string());
    let candidates = repo.list_posts(&filter, None).await?;
    let matcher = QueryMatcher::new(query);
    let matches: Vec<PostView> = candidates
        .posts
        .into_iter()
        .filter(|v| matcher.matches(&v.post.title, &v.post.content))
        .collect();
    let total = matches.len() as u64;
    Ok((pagination.slice(matches), total))
}
