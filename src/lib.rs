//! TaskHub Backend Library
//!
//! Task management API with tiered request throttling and rotating refresh
//! tokens. Exposes every module for the binary and the integration tests.

pub mod analytics;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod tasks;
pub mod throttle;

pub use config::AppConfig;
pub use error::ApiError;
pub use routes::{create_router, AppState};
