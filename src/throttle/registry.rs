//! Throttle registry
//!
//! Maps scope names to rate limits. The table comes from an explicit
//! [`ThrottleConfig`] (defaults below, optionally overridden from TOML) and is
//! fixed for the lifetime of the process.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};

/// Scope applied to anonymous callers when a route declares none.
pub const ANON_SCOPE: &str = "anon";
/// Scope applied to authenticated callers when a route declares none.
pub const USER_SCOPE: &str = "user";

const DEFAULT_RATES: &[(&str, &str)] = &[
    ("login", "10/min"),
    ("register", "5/min"),
    ("password_reset", "3/min"),
    ("task_create", "100/min"),
    ("task_update", "200/min"),
    ("burst", "60/min"),
    ("sustained", "1000/day"),
    ("anon_strict", "20/min"),
    ("low_security", "2000/min"),
    ("medium_security", "500/min"),
    ("high_security", "50/min"),
    ("admin_action", "1000/hour"),
    (ANON_SCOPE, "100/min"),
    (USER_SCOPE, "1000/min"),
];

const DEFAULT_ROLE_SENSITIVE: &[&str] = &["admin_action", USER_SCOPE];

pub const DEFAULT_ADMIN_MULTIPLIER: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    pub fn duration(&self) -> Duration {
        match self {
            Window::Minute => Duration::from_secs(60),
            Window::Hour => Duration::from_secs(60 * 60),
            Window::Day => Duration::from_secs(24 * 60 * 60),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Window::Minute => "min",
            Window::Hour => "hour",
            Window::Day => "day",
        }
    }
}

impl FromStr for Window {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "m" | "min" | "minute" => Ok(Window::Minute),
            "h" | "hour" => Ok(Window::Hour),
            "d" | "day" => Ok(Window::Day),
            other => bail!("Unknown rate window '{}'", other),
        }
    }
}

/// `<count>/<window>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub count: u32,
    pub window: Window,
}

impl RateLimit {
    pub fn new(count: u32, window: Window) -> Self {
        Self { count, window }
    }
}

impl FromStr for RateLimit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (count, window) = s
            .split_once('/')
            .with_context(|| format!("Rate '{}' is not of the form <count>/<window>", s))?;
        let count = count
            .trim()
            .parse::<u32>()
            .with_context(|| format!("Rate '{}' has an invalid count", s))?;
        Ok(Self {
            count,
            window: window.parse()?,
        })
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.count, self.window.as_str())
    }
}

/// A resolved scope: its nominal limit and whether elevated roles get a multiplier on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeRule {
    pub limit: RateLimit,
    pub role_sensitive: bool,
}

/// Throttle table as written in configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub rates: BTreeMap<String, String>,
    pub role_sensitive: Vec<String>,
    pub admin_multiplier: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            rates: DEFAULT_RATES
                .iter()
                .map(|(scope, rate)| (scope.to_string(), rate.to_string()))
                .collect(),
            role_sensitive: DEFAULT_ROLE_SENSITIVE.iter().map(|s| s.to_string()).collect(),
            admin_multiplier: DEFAULT_ADMIN_MULTIPLIER,
        }
    }
}

/// Shape of a throttle TOML file. Every key is optional; rates are merged over the defaults.
#[derive(Debug, Default, Deserialize)]
struct ThrottleFile {
    #[serde(default)]
    rates: BTreeMap<String, String>,
    role_sensitive: Option<Vec<String>>,
    admin_multiplier: Option<u32>,
}

impl ThrottleConfig {
    /// Parse TOML text and merge it over the default table.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ThrottleFile = toml::from_str(text).context("Invalid throttle configuration")?;

        let mut config = Self::default();
        config.rates.extend(file.rates);
        if let Some(role_sensitive) = file.role_sensitive {
            config.role_sensitive = role_sensitive;
        }
        if let Some(multiplier) = file.admin_multiplier {
            config.admin_multiplier = multiplier;
        }

        // Surface bad rate strings at load time rather than on first request.
        ThrottleRegistry::from_config(&config)?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read throttle config {}", path.display()))?;
        let config = Self::from_toml_str(&text)?;
        info!(path = %path.display(), scopes = config.rates.len(), "Loaded throttle config");
        Ok(config)
    }
}

/// Raised when a route names a scope the registry does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownScope(pub String);

impl fmt::Display for UnknownScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown throttle scope '{}'", self.0)
    }
}

impl std::error::Error for UnknownScope {}

#[derive(Debug, Clone)]
pub struct ThrottleRegistry {
    scopes: HashMap<String, ScopeRule>,
}

impl ThrottleRegistry {
    pub fn from_config(config: &ThrottleConfig) -> Result<Self> {
        let mut scopes = HashMap::with_capacity(config.rates.len());
        for (scope, rate) in &config.rates {
            let limit: RateLimit = rate
                .parse()
                .with_context(|| format!("Invalid rate for scope '{}'", scope))?;
            scopes.insert(
                scope.clone(),
                ScopeRule {
                    limit,
                    role_sensitive: config.role_sensitive.iter().any(|s| s == scope),
                },
            );
        }
        Ok(Self { scopes })
    }

    /// Look up a scope. Unknown scopes are an error, never "unlimited".
    pub fn resolve(&self, scope: &str) -> Result<ScopeRule, UnknownScope> {
        self.scopes
            .get(scope)
            .copied()
            .ok_or_else(|| UnknownScope(scope.to_string()))
    }

    /// Scopes from `referenced` that have no entry, logging each one.
    pub fn verify<'a>(&self, referenced: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut missing: Vec<String> = referenced
            .into_iter()
            .filter(|scope| !self.scopes.contains_key(*scope))
            .map(str::to_string)
            .collect();
        missing.sort();
        missing.dedup();

        for scope in &missing {
            error!(scope = %scope, "Route references an unknown throttle scope; its requests will be rejected");
        }
        missing
    }
}

impl Default for ThrottleRegistry {
    fn default() -> Self {
        Self {
            scopes: DEFAULT_RATES
                .iter()
                .filter_map(|(scope, rate)| {
                    let limit = rate.parse().ok()?;
                    Some((
                        scope.to_string(),
                        ScopeRule {
                            limit,
                            role_sensitive: DEFAULT_ROLE_SENSITIVE.contains(scope),
                        },
                    ))
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_parsing() {
        assert_eq!(
            "10/min".parse::<RateLimit>().unwrap(),
            RateLimit::new(10, Window::Minute)
        );
        assert_eq!(
            "1000/day".parse::<RateLimit>().unwrap(),
            RateLimit::new(1000, Window::Day)
        );
        assert_eq!(
            " 5 / h".parse::<RateLimit>().unwrap(),
            RateLimit::new(5, Window::Hour)
        );
        assert!("10".parse::<RateLimit>().is_err());
        assert!("ten/min".parse::<RateLimit>().is_err());
        assert!("10/week".parse::<RateLimit>().is_err());
    }

    #[test]
    fn test_default_table() {
        let registry = ThrottleRegistry::default();

        let login = registry.resolve("login").unwrap();
        assert_eq!(login.limit, RateLimit::new(10, Window::Minute));
        assert!(!login.role_sensitive);

        let admin = registry.resolve("admin_action").unwrap();
        assert_eq!(admin.limit, RateLimit::new(1000, Window::Hour));
        assert!(admin.role_sensitive);

        assert_eq!(
            registry.resolve("anon").unwrap().limit,
            RateLimit::new(100, Window::Minute)
        );
    }

    #[test]
    fn test_default_registry_matches_default_config() {
        let from_config = ThrottleRegistry::from_config(&ThrottleConfig::default()).unwrap();
        let default = ThrottleRegistry::default();
        for (scope, _) in DEFAULT_RATES {
            assert_eq!(from_config.resolve(scope), default.resolve(scope));
        }
    }

    #[test]
    fn test_unknown_scope_fails_closed() {
        let registry = ThrottleRegistry::default();
        assert_eq!(
            registry.resolve("no_such_scope"),
            Err(UnknownScope("no_such_scope".to_string()))
        );
    }

    #[test]
    fn test_toml_overrides_merge() {
        let config = ThrottleConfig::from_toml_str(
            r#"
            admin_multiplier = 3
            role_sensitive = ["admin_action"]

            [rates]
            login = "3/min"
            exports = "2/hour"
            "#,
        )
        .unwrap();

        let registry = ThrottleRegistry::from_config(&config).unwrap();
        assert_eq!(config.admin_multiplier, 3);
        assert_eq!(
            registry.resolve("login").unwrap().limit,
            RateLimit::new(3, Window::Minute)
        );
        assert_eq!(
            registry.resolve("exports").unwrap().limit,
            RateLimit::new(2, Window::Hour)
        );
        // Untouched defaults survive
        assert!(registry.resolve("burst").is_ok());
        assert!(!registry.resolve("user").unwrap().role_sensitive);
    }

    #[test]
    fn test_bad_toml_rate_rejected_at_load() {
        assert!(ThrottleConfig::from_toml_str("[rates]\nlogin = \"10/fortnight\"").is_err());
    }

    #[test]
    fn test_verify_reports_missing() {
        let registry = ThrottleRegistry::default();
        let missing = registry.verify(["login", "ghost", "burst", "ghost"]);
        assert_eq!(missing, vec!["ghost".to_string()]);
    }
}
