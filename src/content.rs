//! Public reads and admin-gated content management.

use crate::auth::AdminContext;
use crate::error::ApiError;
use crate::models::*;
use crate::repo::{PostFilter, Repo, RepoError};

// ---------------- public ----------------

/// Detail view; counts as one read.
pub async fn read_post(repo: &dyn Repo, id: Id, author: &str) -> Result<PostDetail, ApiError> {
    let view = repo.record_view(id).await?;
    Ok(PostDetail::project(&view, author))
}

pub async fn list_categories(repo: &dyn Repo) -> Result<Vec<CategorySummary>, ApiError> {
    Ok(repo.list_categories().await?.into_iter().map(CategorySummary::from).collect())
}

pub async fn list_tag_names(repo: &dyn Repo) -> Result<Vec<String>, ApiError> {
    Ok(repo.list_tags().await?.into_iter().map(|t| t.name).collect())
}

/// XML sitemap of every post plus each category page, newest post first.
pub async fn sitemap(repo: &dyn Repo, site_url: &str) -> Result<String, ApiError> {
    let posts = repo.list_posts(&PostFilter::default(), None).await?.posts;
    let categories = repo.list_categories().await?;
    let lastmod = posts
        .first()
        .map(|v| v.post.date_posted)
        .unwrap_or_else(chrono::Utc::now)
        .format("%Y-%m-%d");

    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push_str("\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n");
    for path in ["", "/blog", "/categories", "/about"] {
        xml.push_str(&format!("  <url><loc>{site_url}{path}</loc><lastmod>{lastmod}</lastmod></url>\n"));
    }
    for c in &categories {
        let slug = c.category.name.to_lowercase().replace(' ', "-");
        xml.push_str(&format!(
            "  <url><loc>{site_url}/categories/{}</loc></url>\n",
            urlencoding::encode(&slug)
        ));
    }
    for v in &posts {
        xml.push_str(&format!(
            "  <url><loc>{site_url}/blog/{}</loc><lastmod>{}</lastmod></url>\n",
            v.post.id,
            v.post.date_posted.format("%Y-%m-%d")
        ));
    }
    xml.push_str("</urlset>\n");
    Ok(xml)
}

// ---------------- admin ----------------

fn required(value: &str, what: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation(format!("{what} must not be empty")));
    }
    Ok(trimmed.to_string())
}

pub async fn create_post(repo: &dyn Repo, ctx: &AdminContext, new: NewPost) -> Result<PostView, ApiError> {
    ctx.ensure_admin()?;
    let title = required(&new.title, "title")?;
    if new.content.trim().is_empty() {
        return Err(ApiError::validation("content must not be empty"));
    }
    let Some(category_id) = new.category_id else {
        return Err(ApiError::validation("a category is required"));
    };
    match repo.get_category(category_id).await {
        Ok(_) => {}
        Err(RepoError::NotFound) => return Err(ApiError::validation(format!("category {category_id} does not exist"))),
        Err(e) => return Err(e.into()),
    }
    let view = repo.create_post(NewPost { title, ..new }).await?;
    tracing::info!(post_id = view.post.id, by = ctx.subject(), "post created");
    Ok(view)
}

pub async fn delete_post(repo: &dyn Repo, ctx: &AdminContext, id: Id) -> Result<(), ApiError> {
    ctx.ensure_admin()?;
    repo.delete_post(id).await?;
    tracing::info!(post_id = id, by = ctx.subject(), "post deleted");
    Ok(())
}

/// Deletes the first post whose title is exactly `title`.
pub async fn delete_post_by_title(repo: &dyn Repo, ctx: &AdminContext, title: &str) -> Result<Post, ApiError> {
    ctx.ensure_admin()?;
    required(title, "title")?;
    let post = repo.find_post_by_title(title).await?.ok_or(ApiError::NotFound)?;
    repo.delete_post(post.id).await?;
    tracing::info!(post_id = post.id, by = ctx.subject(), "post deleted by title");
    Ok(post)
}

pub async fn create_category(repo: &dyn Repo, ctx: &AdminContext, new: NewCategory) -> Result<Category, ApiError> {
    ctx.ensure_admin()?;
    let name = required(&new.name, "category name")?;
    if repo.find_category_by_name(&name).await?.is_some_and(|c| c.name == name) {
        return Err(ApiError::Conflict(format!("category '{name}' already exists")));
    }
    let description = new.description.filter(|d| !d.trim().is_empty());
    Ok(repo.create_category(NewCategory { name, description }).await?)
}

/// Posts of the category stay, with no category.
pub async fn delete_category(repo: &dyn Repo, ctx: &AdminContext, id: Id) -> Result<u64, ApiError> {
    ctx.ensure_admin()?;
    let detached = repo.delete_category(id).await?;
    tracing::info!(category_id = id, detached, by = ctx.subject(), "category deleted");
    Ok(detached)
}

pub async fn create_tag(repo: &dyn Repo, ctx: &AdminContext, new: NewTag) -> Result<Tag, ApiError> {
    ctx.ensure_admin()?;
    let name = required(&new.name, "tag name")?;
    if repo.list_tags().await?.iter().any(|t| t.name == name) {
        return Err(ApiError::Conflict(format!("tag '{name}' already exists")));
    }
    Ok(repo.create_tag(NewTag { name }).await?)
}

/// Removes the tag from every post; the posts themselves stay.
pub async fn delete_tag(repo: &dyn Repo, ctx: &AdminContext, id: Id) -> Result<(), ApiError> {
    ctx.ensure_admin()?;
    repo.delete_tag(id).await?;
    tracing::info!(tag_id = id, by = ctx.subject(), "tag deleted");
    Ok(())
}
