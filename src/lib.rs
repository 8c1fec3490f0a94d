pub mod auth;
pub mod config;
pub mod content;
pub mod dump;
pub mod error;
pub mod models;
pub mod openapi;
pub mod repo;
pub mod report;
pub mod routes;
pub mod search;
pub mod security;
pub mod text;
pub mod throttle;

// Re-export commonly used items for tests / external users
pub use config::AppConfig;
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
