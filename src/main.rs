use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use quire::openapi::ApiDoc;
use quire::repo::Repo;
use quire::report::HttpImageFetcher;
use quire::{config, AppConfig, AppState, SecurityHeaders};

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use quire::repo::inmem::InMemRepo;
    let repo = match &cfg.data_dir {
        Some(dir) => {
            info!("Using in-memory repository persisted under {}", dir.display());
            InMemRepo::persistent(dir)
        }
        None => {
            info!("Using volatile in-memory repository");
            InMemRepo::new()
        }
    };
    Ok(Arc::new(repo))
}

#[cfg(feature = "postgres-store")]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    use sqlx::postgres::PgPoolOptions;
    let db_url = cfg.database_url.as_deref().context("DATABASE_URL must be set for postgres-store")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("failed to connect to Postgres")?;
    sqlx::migrate!("./migrations").run(&pool).await.context("failed to run migrations")?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(quire::repo::pg::PgRepo::new(pool)))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = AppConfig::from_env()?;
    info!("Bootstrapping quire");
    if !cfg.admin_login_enabled() {
        tracing::warn!("ADMIN_ID/ADMIN_PASSWORD not set; admin login is disabled");
    }

    let repo = build_repo(&cfg).await?;
    repo.ensure_default_category().await.context("failed to seed default category")?;

    let fetcher = Arc::new(HttpImageFetcher::new(cfg.image_fetch_timeout).context("failed to build HTTP client")?);
    let bind_addr = cfg.bind_addr.clone();
    let security = SecurityHeaders::from_config(&cfg);
    let frontend_url = cfg.frontend_url.clone();
    let state = AppState::new(repo, cfg, fetcher);
    let openapi = ApiDoc::openapi();

    let server = HttpServer::new(move || {
        let mut cors = Cors::default()
            // during local dev allow Vite / CRA default ports
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://localhost:3000")
            .allow_any_header()
            .allowed_methods(["GET", "POST", "DELETE", "OPTIONS"])
            .max_age(3600);
        if let Some(front) = &frontend_url {
            cors = cors.allowed_origin(front);
        }

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(security.clone())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {bind_addr}"))?;

    info!("Listening on http://{bind_addr}");
    server.run().await?;
    Ok(())
}
