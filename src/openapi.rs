use crate::auth::{LoginRequest, LoginResponse};
use crate::dump::{Dump, DumpCategory, DumpPost, DumpTag, RestoreReport};
use crate::models::{Category, CategorySummary, NewCategory, NewPost, NewTag, PostDetail, PostPage, PostSummary, Tag};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_posts,
        crate::routes::get_post,
        crate::routes::list_categories,
        crate::routes::list_tags,
        crate::routes::admin_login,
        crate::routes::create_post,
        crate::routes::create_category,
        crate::routes::create_tag,
        crate::routes::dump_json,
        crate::routes::restore_dump,
    ),
    components(schemas(
        PostSummary, PostDetail, PostPage, CategorySummary, Category, NewCategory, Tag, NewTag, NewPost,
        LoginRequest, LoginResponse, Dump, DumpCategory, DumpTag, DumpPost, RestoreReport,
        crate::routes::DeleteByTitle
    )),
    tags(
        (name = "posts", description = "Search and read posts"),
        (name = "admin", description = "Content management and backups"),
    )
)]
pub struct ApiDoc;
