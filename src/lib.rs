pub mod app;
pub mod authz;
pub mod config;
pub mod db;
pub mod docs;
pub mod errors;
pub mod jwt;
pub mod models;
pub mod notify;
pub mod onboarding;
pub mod rate_limit;
pub mod routes;
pub mod utils;

// Re-export commonly used items for tests
pub use app::{create_app, AppState};
