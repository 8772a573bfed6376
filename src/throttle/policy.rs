//! Admin override policy

use crate::auth::models::UserRole;
use crate::throttle::registry::{RateLimit, ScopeRule, DEFAULT_ADMIN_MULTIPLIER};

/// Raises limits for admins on role-sensitive scopes.
#[derive(Debug, Clone, Copy)]
pub struct AdminOverride {
    multiplier: u32,
}

impl AdminOverride {
    pub fn new(multiplier: u32) -> Self {
        Self { multiplier }
    }

    /// Effective limit for a caller with `role` (`None` for anonymous callers).
    pub fn adjust(&self, rule: &ScopeRule, role: Option<UserRole>) -> RateLimit {
        match role {
            Some(UserRole::Admin) if rule.role_sensitive => RateLimit {
                count: rule.limit.count.saturating_mul(self.multiplier),
                window: rule.limit.window,
            },
            _ => rule.limit,
        }
    }
}

impl Default for AdminOverride {
    fn default() -> Self {
        Self::new(DEFAULT_ADMIN_MULTIPLIER)
    }
}
