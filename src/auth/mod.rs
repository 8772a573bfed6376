//! Authentication Module
//! Mission: Accounts, JWT access tokens and rotating refresh cookies

pub mod api;
pub mod jwt;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod tokens;
pub mod user_store;

pub use api::AuthState;
pub use jwt::JwtHandler;
pub use ledger::{RefreshLedger, SqliteRefreshLedger};
pub use middleware::{auth_middleware, require_admin};
pub use tokens::{CookieSettings, TokenLifecycle};
pub use user_store::{UserDirectory, UserStore};
