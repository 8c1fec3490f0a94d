use std::sync::Arc;
use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::TryStreamExt as _;

use crate::auth::{self, AdminContext, Auth, LoginRequest};
use crate::config::AppConfig;
use crate::content;
use crate::dump;
use crate::error::ApiError;
use crate::models::*;
use crate::repo::Repo;
use crate::report::{self, ImageFetcher};
use crate::search::{self, SearchParams};
use crate::throttle::LoginThrottle;

/// Dumps carry inline images, so allow well beyond a normal JSON body.
const DUMP_SIZE_LIMIT: usize = 64 * 1024 * 1024;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(web::resource("/posts").route(web::get().to(list_posts)))
            .service(web::resource("/posts/{id}").route(web::get().to(get_post)))
            .service(web::resource("/categories").route(web::get().to(list_categories)))
            .service(web::resource("/tags").route(web::get().to(list_tags)))
            .service(web::resource("/admin/login").route(web::post().to(admin_login)))
            .service(web::resource("/admin/posts").route(web::post().to(create_post)))
            .service(web::resource("/admin/posts/delete").route(web::post().to(delete_post_by_title)))
            .service(web::resource("/admin/posts/{id}").route(web::delete().to(delete_post)))
            .service(web::resource("/admin/categories").route(web::post().to(create_category)))
            .service(web::resource("/admin/categories/{id}").route(web::delete().to(delete_category)))
            .service(web::resource("/admin/tags").route(web::post().to(create_tag)))
            .service(web::resource("/admin/tags/{id}").route(web::delete().to(delete_tag)))
            .service(web::resource("/admin/backup").route(web::get().to(backup_document)))
            .service(web::resource("/admin/dump").route(web::get().to(dump_json)))
            .service(web::resource("/admin/restore").route(web::post().to(restore_dump)))
            .service(web::resource("/admin/maintenance/sequences").route(web::post().to(fix_sequences))),
    );
    cfg.route("/sitemap.xml", web::get().to(sitemap));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub config: Arc<AppConfig>,
    pub fetcher: Arc<dyn ImageFetcher>,
    pub throttle: LoginThrottle,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>, config: AppConfig, fetcher: Arc<dyn ImageFetcher>) -> Self {
        let throttle = LoginThrottle::new(config.login_limit, config.login_window);
        Self { repo, config: Arc::new(config), fetcher, throttle }
    }
}

fn attachment(mime: &str, filename: &str, body: Vec<u8>) -> HttpResponse {
    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, mime.to_string()))
        .insert_header((header::CONTENT_DISPOSITION, format!("attachment; filename={filename}")))
        .body(body)
}

// ---------------- public ----------------

#[utoipa::path(
    get,
    path = "/api/posts",
    params(SearchParams),
    responses((status = 200, description = "One page of posts, newest first", body = PostPage))
)]
pub async fn list_posts(data: web::Data<AppState>, query: web::Query<SearchParams>) -> Result<HttpResponse, ApiError> {
    let page = search::search(data.repo.as_ref(), &query, &data.config.author).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[utoipa::path(
    get,
    path = "/api/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post; counts one view", body = PostDetail),
        (status = 404, description = "Post not found")
    )
)]
pub async fn get_post(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let post = content::read_post(data.repo.as_ref(), path.into_inner(), &data.config.author).await?;
    Ok(HttpResponse::Ok().json(post))
}

#[utoipa::path(
    get,
    path = "/api/categories",
    responses((status = 200, description = "Categories with live post counts", body = [CategorySummary]))
)]
pub async fn list_categories(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(content::list_categories(data.repo.as_ref()).await?))
}

#[utoipa::path(
    get,
    path = "/api/tags",
    responses((status = 200, description = "Tag names", body = [String]))
)]
pub async fn list_tags(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(content::list_tag_names(data.repo.as_ref()).await?))
}

pub async fn sitemap(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let xml = content::sitemap(data.repo.as_ref(), &data.config.site_url).await?;
    Ok(HttpResponse::Ok().content_type("application/xml").body(xml))
}

// ---------------- admin ----------------

#[utoipa::path(
    post,
    path = "/api/admin/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Admin token", body = crate::auth::LoginResponse),
        (status = 401, description = "Wrong credentials"),
        (status = 429, description = "Too many attempts")
    )
)]
pub async fn admin_login(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let client = req.connection_info().realip_remote_addr().unwrap_or("unknown").to_string();
    let resp = auth::login(&data.config, &data.throttle, &client, &payload)?;
    Ok(HttpResponse::Ok().json(resp))
}

#[utoipa::path(
    post,
    path = "/api/admin/posts",
    request_body = NewPost,
    responses(
        (status = 201, description = "Post created", body = PostDetail),
        (status = 403, description = "Forbidden – admins only"),
        (status = 422, description = "Validation failed")
    )
)]
pub async fn create_post(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewPost>) -> Result<HttpResponse, ApiError> {
    let ctx = AdminContext::from_auth(Some(&auth));
    let view = content::create_post(data.repo.as_ref(), &ctx, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(PostDetail::project(&view, &data.config.author)))
}

pub async fn delete_post(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let ctx = AdminContext::from_auth(Some(&auth));
    content::delete_post(data.repo.as_ref(), &ctx, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(serde::Deserialize, utoipa::ToSchema)]
pub struct DeleteByTitle {
    pub title: String,
}

pub async fn delete_post_by_title(auth: Auth, data: web::Data<AppState>, payload: web::Json<DeleteByTitle>) -> Result<HttpResponse, ApiError> {
    let ctx = AdminContext::from_auth(Some(&auth));
    let post = content::delete_post_by_title(data.repo.as_ref(), &ctx, &payload.title).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": post.id, "title": post.title })))
}

#[utoipa::path(
    post,
    path = "/api/admin/categories",
    request_body = NewCategory,
    responses(
        (status = 201, description = "Category created", body = Category),
        (status = 409, description = "Name already taken")
    )
)]
pub async fn create_category(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewCategory>) -> Result<HttpResponse, ApiError> {
    let ctx = AdminContext::from_auth(Some(&auth));
    let category = content::create_category(data.repo.as_ref(), &ctx, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(category))
}

pub async fn delete_category(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let ctx = AdminContext::from_auth(Some(&auth));
    let detached = content::delete_category(data.repo.as_ref(), &ctx, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "detached_posts": detached })))
}

#[utoipa::path(
    post,
    path = "/api/admin/tags",
    request_body = NewTag,
    responses(
        (status = 201, description = "Tag created", body = Tag),
        (status = 409, description = "Name already taken")
    )
)]
pub async fn create_tag(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewTag>) -> Result<HttpResponse, ApiError> {
    let ctx = AdminContext::from_auth(Some(&auth));
    let tag = content::create_tag(data.repo.as_ref(), &ctx, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(tag))
}

pub async fn delete_tag(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let ctx = AdminContext::from_auth(Some(&auth));
    content::delete_tag(data.repo.as_ref(), &ctx, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- backup ----------------

pub async fn backup_document(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let ctx = AdminContext::from_auth(Some(&auth));
    let bytes = report::export_document(data.repo.as_ref(), &ctx, data.fetcher.as_ref()).await?;
    Ok(attachment(report::DOCX_MIME, report::REPORT_FILENAME, bytes))
}

#[utoipa::path(
    get,
    path = "/api/admin/dump",
    responses(
        (status = 200, description = "Full JSON dump", body = crate::dump::Dump),
        (status = 403, description = "Forbidden – admins only")
    )
)]
pub async fn dump_json(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let ctx = AdminContext::from_auth(Some(&auth));
    let dump = dump::export_dump(data.repo.as_ref(), &ctx).await?;
    Ok(attachment("application/json", "db_dump.json", dump::to_json(&dump)?))
}

async fn read_body(mut payload: web::Payload) -> Result<Vec<u8>, ApiError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = payload.try_next().await.map_err(|e| {
        log::error!("payload read error: {e}");
        ApiError::bad_request("could not read request body")
    })? {
        if bytes.len() + chunk.len() > DUMP_SIZE_LIMIT { return Err(ApiError::bad_request("dump too large")); }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// Contents of the `dumpfile` form field.
async fn read_dump_field(mut form: Multipart) -> Result<Vec<u8>, ApiError> {
    while let Some(mut field) = form.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::bad_request("malformed multipart body")
    })? {
        if field.content_disposition().get_name() != Some("dumpfile") { continue; }
        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::bad_request("could not read dumpfile")
        })? {
            if bytes.len() + chunk.len() > DUMP_SIZE_LIMIT { return Err(ApiError::bad_request("dump too large")); }
            bytes.extend_from_slice(&chunk);
        }
        return Ok(bytes);
    }
    Err(ApiError::bad_request("dumpfile field missing"))
}

#[utoipa::path(
    post,
    path = "/api/admin/restore",
    request_body(content = crate::dump::Dump, description = "JSON dump, raw or as multipart field `dumpfile`"),
    responses(
        (status = 200, description = "Content replaced", body = crate::dump::RestoreReport),
        (status = 400, description = "Malformed dump; nothing changed"),
        (status = 403, description = "Forbidden – admins only")
    )
)]
pub async fn restore_dump(
    auth: Auth,
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Payload,
) -> Result<HttpResponse, ApiError> {
    let ctx = AdminContext::from_auth(Some(&auth));
    ctx.ensure_admin()?;
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));
    let raw = if is_multipart {
        read_dump_field(Multipart::new(req.headers(), payload)).await?
    } else {
        read_body(payload).await?
    };
    let report = dump::restore_dump(data.repo.as_ref(), &ctx, &raw).await?;
    Ok(HttpResponse::Ok().json(report))
}

pub async fn fix_sequences(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let ctx = AdminContext::from_auth(Some(&auth));
    let repairs = dump::fix_sequences(data.repo.as_ref(), &ctx).await?;
    Ok(HttpResponse::Ok().json(repairs))
}
