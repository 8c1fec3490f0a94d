use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};

/// Process configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub admin_id: Option<String>,
    pub admin_password: Option<String>,
    pub database_url: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub bind_addr: String,
    pub frontend_url: Option<String>,
    pub author: String,
    pub site_url: String,
    pub enable_hsts: bool,
    pub admin_session: Duration,
    pub login_limit: usize,
    pub login_window: Duration,
    pub image_fetch_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        fn opt(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }
        fn num<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
            match opt(name) {
                Some(v) => v.parse().ok().with_context(|| format!("{name} must be a number, got '{v}'")),
                None => Ok(default),
            }
        }

        let jwt_secret = opt("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.len() < 32 {
            bail!("JWT_SECRET must be at least 32 characters long");
        }

        Ok(Self {
            jwt_secret,
            admin_id: opt("ADMIN_ID"),
            admin_password: opt("ADMIN_PASSWORD"),
            database_url: opt("DATABASE_URL"),
            data_dir: opt("QUIRE_DATA_DIR").map(PathBuf::from),
            bind_addr: opt("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            frontend_url: opt("FRONTEND_URL"),
            author: opt("BLOG_AUTHOR").unwrap_or_else(|| "Admin".into()),
            site_url: opt("SITE_URL")
                .unwrap_or_else(|| "http://localhost:8080".into())
                .trim_end_matches('/')
                .to_string(),
            enable_hsts: opt("ENABLE_HSTS").is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
            admin_session: Duration::from_secs(60 * num("ADMIN_SESSION_MINUTES", 30u64)?),
            login_limit: num("LOGIN_RATE_LIMIT", 5usize)?,
            login_window: Duration::from_secs(num("LOGIN_RATE_WINDOW", 300u64)?),
            image_fetch_timeout: Duration::from_secs(num("IMAGE_FETCH_TIMEOUT_SECS", 10u64)?),
        })
    }

    /// Admin login is only possible when both credentials are configured.
    pub fn admin_login_enabled(&self) -> bool {
        self.admin_id.is_some() && self.admin_password.is_some()
    }

    /// Defaults suitable for tests: fixed secret, admin `admin` / `secret`.
    pub fn for_tests() -> Self {
        Self {
            jwt_secret: "test-secret-must-be-32-bytes-long!!".into(),
            admin_id: Some("admin".into()),
            admin_password: Some("secret".into()),
            database_url: None,
            data_dir: None,
            bind_addr: "127.0.0.1:0".into(),
            frontend_url: None,
            author: "Test Author".into(),
            site_url: "https://blog.example".into(),
            enable_hsts: false,
            admin_session: Duration::from_secs(30 * 60),
            login_limit: 5,
            login_window: Duration::from_secs(300),
            image_fetch_timeout: Duration::from_secs(10),
        }
    }
}
