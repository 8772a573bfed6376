//! Runtime configuration
//!
//! Everything can come from CLI flags or the environment (`.env` is loaded
//! first by the binary). The throttle table lives in an optional TOML file.

use crate::throttle::ThrottleConfig;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "taskhub")]
#[command(about = "Task management API with tiered throttling and rotating refresh tokens")]
pub struct AppConfig {
    /// Address to listen on
    #[arg(long, env = "TASKHUB_BIND", default_value = "0.0.0.0:8000")]
    pub bind: String,

    /// SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = "taskhub.db")]
    pub database_path: String,

    /// HS256 signing secret for access and refresh tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    #[arg(long, env = "ACCESS_TOKEN_LIFETIME_MINUTES", default_value = "10")]
    pub access_token_minutes: u64,

    #[arg(long, env = "REFRESH_TOKEN_LIFETIME_MINUTES", default_value = "100")]
    pub refresh_token_minutes: u64,

    /// Production mode: refresh cookie is marked Secure
    #[arg(long, env = "PRODUCTION")]
    pub production: bool,

    /// Blacklist the refresh cookie on logout instead of only clearing it
    #[arg(long, env = "REVOKE_ON_LOGOUT")]
    pub revoke_on_logout: bool,

    /// TOML file overriding the default throttle table
    #[arg(long, env = "THROTTLE_CONFIG")]
    pub throttle_config: Option<PathBuf>,

    /// Comma-separated allowed origins. Unset means permissive CORS.
    #[arg(long, env = "CORS_ALLOWED_ORIGINS")]
    pub cors_origins: Option<String>,

    /// Counter store deadline before the gate rejects
    #[arg(long, env = "THROTTLE_TIMEOUT_MS", default_value = "250")]
    pub gate_timeout_ms: u64,

    /// Seconds between purges of expired counters and ledger rows
    #[arg(long, env = "MAINTENANCE_INTERVAL_SECS", default_value = "300")]
    pub maintenance_interval_secs: u64,

    #[arg(long, env = "BCRYPT_COST", default_value = "12")]
    pub bcrypt_cost: u32,

    /// Bootstrap admin, created only if no admin exists yet
    #[arg(long, env = "ADMIN_EMAIL")]
    pub admin_email: Option<String>,

    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,
}

impl AppConfig {
    pub fn access_lifetime(&self) -> Duration {
        Duration::from_secs(self.access_token_minutes * 60)
    }

    pub fn refresh_lifetime(&self) -> Duration {
        Duration::from_secs(self.refresh_token_minutes * 60)
    }

    pub fn gate_timeout(&self) -> Duration {
        Duration::from_millis(self.gate_timeout_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs.max(1))
    }

    pub fn allowed_origins(&self) -> Vec<String> {
        self.cors_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn load_throttle(&self) -> Result<ThrottleConfig> {
        match &self.throttle_config {
            Some(path) => ThrottleConfig::load(path),
            None => Ok(ThrottleConfig::default()),
        }
    }
}
