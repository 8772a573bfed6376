//! Request gate.
//!
//! Identifies the caller, charges the route's throttle scopes and admits or
//! rejects before the handler runs. Anything that prevents a decision (an
//! unknown scope, a slow counter store) rejects.

use crate::auth::jwt::JwtHandler;
use crate::auth::middleware::bearer_token;
use crate::auth::models::{Claims, UserRole};
use crate::auth::user_store::UserDirectory;
use crate::error::{ApiError, GENERIC_RETRY_AFTER};
use crate::throttle::{
    AdminOverride, CounterStore, Principal, ScopeCheck, ThrottleRegistry, UnknownScope, Verdict,
};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug)]
pub enum GateError {
    RateLimited { scope: String, retry_after: Duration },
    Configuration(UnknownScope),
    StoreTimeout,
    Store(anyhow::Error),
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::RateLimited { scope, retry_after } => write!(
                f,
                "Rate limit exceeded for scope '{}', retry in {:?}",
                scope, retry_after
            ),
            GateError::Configuration(e) => write!(f, "Throttle misconfiguration: {}", e),
            GateError::StoreTimeout => write!(f, "Counter store timed out"),
            GateError::Store(e) => write!(f, "Counter store error: {}", e),
        }
    }
}

impl std::error::Error for GateError {}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::RateLimited { retry_after, .. } => ApiError::RateLimited { retry_after },
            // Callers never learn why the gate could not decide.
            _ => ApiError::RateLimited {
                retry_after: GENERIC_RETRY_AFTER,
            },
        }
    }
}

pub struct RequestGate {
    registry: Arc<ThrottleRegistry>,
    overrides: AdminOverride,
    store: Arc<dyn CounterStore>,
    timeout: Duration,
}

impl RequestGate {
    pub fn new(
        registry: Arc<ThrottleRegistry>,
        overrides: AdminOverride,
        store: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            registry,
            overrides,
            store,
            timeout: DEFAULT_GATE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ThrottleRegistry {
        &self.registry
    }

    /// Charge `scopes` in order for `principal`. An empty list means the
    /// principal's default ceiling. Returns the smallest remaining quota.
    pub async fn check(&self, principal: &Principal, scopes: &[&str]) -> Result<u32, GateError> {
        let defaults = [principal.default_scope()];
        let scopes = if scopes.is_empty() { &defaults[..] } else { scopes };

        let mut checks = Vec::with_capacity(scopes.len());
        for scope in scopes {
            let rule = self.registry.resolve(scope).map_err(|e| {
                error!(principal = %principal, "{}", e);
                GateError::Configuration(e)
            })?;
            checks.push(ScopeCheck {
                scope: scope.to_string(),
                limit: self.overrides.adjust(&rule, principal.role()),
            });
        }

        let key = principal.key();
        let verdict = match tokio::time::timeout(self.timeout, self.store.hit(&key, &checks)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                error!(principal = %principal, "Counter store failed: {:#}", e);
                return Err(GateError::Store(e));
            }
            Err(_) => {
                error!(
                    principal = %principal,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Counter store timed out"
                );
                return Err(GateError::StoreTimeout);
            }
        };

        match verdict {
            Verdict::Admitted { remaining } => Ok(remaining),
            Verdict::Exceeded { scope, retry_after } => {
                warn!(
                    principal = %principal,
                    scope = %scope,
                    retry_after_secs = retry_after.as_secs(),
                    "Rate limit exceeded"
                );
                Err(GateError::RateLimited { scope, retry_after })
            }
        }
    }

    pub async fn purge_expired(&self) -> anyhow::Result<usize> {
        self.store.purge_expired().await
    }
}

/// Per-route gate state: the shared gate plus the route's scopes.
#[derive(Clone)]
pub struct ThrottleState {
    gate: Arc<RequestGate>,
    jwt: Arc<JwtHandler>,
    users: Arc<dyn UserDirectory>,
    scopes: &'static [&'static str],
}

impl ThrottleState {
    pub fn new(
        gate: Arc<RequestGate>,
        jwt: Arc<JwtHandler>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            gate,
            jwt,
            users,
            scopes: &[],
        }
    }

    pub fn scoped(&self, scopes: &'static [&'static str]) -> Self {
        Self {
            scopes,
            ..self.clone()
        }
    }

    /// Authenticated user (with their current role) or the client IP.
    fn identify(&self, req: &Request) -> Principal {
        let claims = req
            .extensions()
            .get::<Claims>()
            .cloned()
            .or_else(|| {
                bearer_token(req.headers()).and_then(|token| self.jwt.validate_token(&token).ok())
            });

        if let Some(id) = claims.as_ref().and_then(Claims::user_id) {
            let token_role = claims.as_ref().map_or(UserRole::User, |c| c.role);
            let role = match self.users.find_by_id(&id) {
                Ok(Some(user)) => user.role,
                Ok(None) => token_role,
                Err(e) => {
                    warn!(user_id = %id, "Role lookup failed, using token role: {:#}", e);
                    token_role
                }
            };
            return Principal::User { id, role };
        }

        let socket_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let ip = socket_ip
            .or_else(|| forwarded_ip(req.headers()))
            .unwrap_or_else(|| {
                debug!("No client address available, counting as unspecified");
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            });
        Principal::Anonymous { ip }
    }
}

/// First hop of `X-Forwarded-For`
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
}

/// Throttle middleware. Attach per route with `ThrottleState::scoped`.
pub async fn throttle_middleware(
    State(state): State<ThrottleState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = state.identify(&request);
    let remaining = state.gate.check(&principal, state.scopes).await?;

    request.extensions_mut().insert(principal);
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
    Ok(response)
}
