#![cfg(feature = "inmem-store")]

use std::sync::Arc;

use actix_web::{test, web, App};
use async_trait::async_trait;
use quire::repo::inmem::InMemRepo;
use quire::report::{ImageError, ImageFetcher};
use quire::{config, AppConfig, AppState, SecurityHeaders};
use serial_test::serial;

struct NoNetwork;

#[async_trait]
impl ImageFetcher for NoNetwork {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, ImageError> {
        Err(ImageError::DataUrl)
    }
}

fn state(cfg: AppConfig) -> AppState {
    AppState::new(Arc::new(InMemRepo::new()), cfg, Arc::new(NoNetwork))
}

#[actix_web::test]
#[serial]
async fn headers_present_without_hsts() {
    let cfg = AppConfig::for_tests();
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_config(&cfg))
            .app_data(web::Data::new(state(cfg)))
            .configure(config),
    )
    .await;
    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/tags").to_request()).await;
    assert!(resp.status().is_success());
    let headers = resp.headers();
    assert!(headers.get("content-security-policy").unwrap().to_str().unwrap().contains("img-src 'self' data: https:"));
    assert_eq!(headers.get("referrer-policy").unwrap(), "no-referrer");
    assert!(headers.get("strict-transport-security").is_none());
    // public reads stay cacheable
    assert!(headers.get("cache-control").is_none());
}

#[actix_web::test]
#[serial]
async fn hsts_enabled_via_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    std::env::set_var("ENABLE_HSTS", "true");
    let cfg = AppConfig::from_env().unwrap();
    std::env::remove_var("ENABLE_HSTS");
    assert!(cfg.enable_hsts);

    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_config(&cfg))
            .app_data(web::Data::new(state(cfg)))
            .configure(config),
    )
    .await;
    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/tags").to_request()).await;
    assert!(resp.headers().get("strict-transport-security").is_some());

    // explicit override wins over configuration
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::default().with_hsts(false))
            .app_data(web::Data::new(state(AppConfig::for_tests())))
            .configure(config),
    )
    .await;
    let resp = test::call_service(&app, test::TestRequest::post().uri("/api/admin/login").set_json(serde_json::json!({"user_id": "x", "password": "y"})).to_request()).await;
    assert_eq!(resp.status(), 401);
    assert!(resp.headers().get("strict-transport-security").is_none());
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-store");
}
