//! Authentication Middleware
//! Mission: Protect API endpoints with JWT validation

use crate::auth::{jwt::JwtHandler, models::Claims, models::UserRole};
use crate::error::ApiError;
use crate::throttle::Principal;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use std::sync::Arc;
use tracing::debug;

/// Bearer token from the `Authorization` header, if well formed
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

/// Auth middleware that validates access tokens
pub async fn auth_middleware(
    State(jwt_handler): State<Arc<JwtHandler>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())
        .ok_or(ApiError::Unauthorized("Authentication credentials were not provided"))?;

    let claims = jwt_handler.validate_token(&token).map_err(|e| {
        debug!("Rejected access token: {:#}", e);
        ApiError::Unauthorized("Invalid or expired token")
    })?;

    // Add claims to request extensions so handlers can access them
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Admin-only guard. Runs after `auth_middleware`.
///
/// Prefers the role the request gate resolved from the user store, so a
/// demoted admin loses access without waiting for their token to expire.
pub async fn require_admin(req: Request, next: Next) -> Result<Response, ApiError> {
    let role = match req.extensions().get::<Principal>() {
        Some(principal) => principal.role(),
        None => extract_claims(&req).map(|claims| claims.role),
    };

    match role {
        Some(UserRole::Admin) => Ok(next.run(req).await),
        Some(_) => Err(ApiError::Forbidden),
        None => Err(ApiError::Unauthorized(
            "Authentication credentials were not provided",
        )),
    }
}

/// Extract claims from request (use after auth middleware)
pub fn extract_claims(req: &Request) -> Option<&Claims> {
    req.extensions().get::<Claims>()
}
