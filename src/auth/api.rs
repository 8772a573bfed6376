//! Authentication API Endpoints
//! Mission: Registration, login, refresh rotation and logout

use crate::auth::{
    models::{AccessTokenResponse, Claims, LoginRequest, RegisterRequest, UserResponse, UserRole},
    tokens::{TokenLifecycle, TokenPair, REFRESH_COOKIE},
    user_store::{NewUser, UserStore},
};
use crate::error::ApiError;
use axum::{extract::State, http::StatusCode, Extension, Json};
use axum_extra::extract::{cookie::CookieJar, WithRejection};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub const MIN_PASSWORD_LEN: usize = 8;

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub user_store: Arc<UserStore>,
    pub tokens: Arc<TokenLifecycle>,
}

impl AuthState {
    pub fn new(user_store: Arc<UserStore>, tokens: Arc<TokenLifecycle>) -> Self {
        Self { user_store, tokens }
    }

    fn respond(&self, jar: CookieJar, pair: &TokenPair) -> (CookieJar, Json<AccessTokenResponse>) {
        let jar = jar.add(self.tokens.refresh_cookie(pair));
        (
            jar,
            Json(AccessTokenResponse {
                access_token: pair.access_token.clone(),
                expires_in: pair.expires_in,
                role: pair.role,
            }),
        )
    }
}

/// Registration endpoint - POST /api/auth/register
pub async fn register(
    State(state): State<AuthState>,
    WithRejection(Json(payload), _): WithRejection<Json<RegisterRequest>, ApiError>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    validate_registration(&payload).map_err(ApiError::Validation)?;

    let created = state.user_store.create_user(
        NewUser {
            email: payload.email,
            password: payload.password,
            first_name: payload.first_name,
            last_name: payload.last_name,
        },
        UserRole::User,
    )?;

    let user = created.ok_or_else(|| {
        ApiError::Conflict("A user with this email already exists".to_string())
    })?;

    info!(user_id = %user.id, "User registered");
    Ok((StatusCode::CREATED, Json(UserResponse::from_user(&user))))
}

fn validate_registration(payload: &RegisterRequest) -> Result<(), String> {
    if !looks_like_email(payload.email.trim()) {
        return Err("Enter a valid email address".to_string());
    }
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    if payload.password != payload.password_confirm {
        return Err("Passwords don't match".to_string());
    }
    Ok(())
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// Login endpoint - POST /api/auth/login
pub async fn login(
    State(state): State<AuthState>,
    jar: CookieJar,
    WithRejection(Json(payload), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> Result<(CookieJar, Json<AccessTokenResponse>), ApiError> {
    let user = state
        .user_store
        .verify_password(&payload.email, &payload.password)?
        .ok_or_else(|| {
            warn!(email = %payload.email, "Failed login attempt");
            ApiError::Unauthorized("Invalid email or password")
        })?;

    state.user_store.record_login(&user.id)?;
    let pair = state.tokens.issue(&user).await?;

    info!(user_id = %user.id, role = user.role.as_str(), "Login successful");
    Ok(state.respond(jar, &pair))
}

/// Token refresh endpoint - POST /api/auth/refresh
/// Reads the refresh cookie, rotates it and returns a new access token.
pub async fn refresh(
    State(state): State<AuthState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<AccessTokenResponse>), ApiError> {
    let presented = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string());
    let pair = state.tokens.refresh(presented.as_deref()).await?;
    Ok(state.respond(jar, &pair))
}

/// Logout endpoint - POST /api/auth/logout
pub async fn logout(
    State(state): State<AuthState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Value>), ApiError> {
    let presented = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string());
    state.tokens.logout(presented.as_deref()).await?;

    let jar = jar.add(state.tokens.clear_cookie());
    Ok((jar, Json(json!({ "message": "Successfully logged out" }))))
}

/// Current user - GET /api/auth/me
pub async fn me(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserResponse>, ApiError> {
    let id = claims
        .user_id()
        .ok_or(ApiError::Unauthorized("Invalid or expired token"))?;
    let user = state
        .user_store
        .get_user_by_id(&id)?
        .ok_or(ApiError::Unauthorized("User not found"))?;
    Ok(Json(UserResponse::from_user(&user)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(email: &str, password: &str, confirm: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            password_confirm: confirm.to_string(),
            first_name: String::new(),
            last_name: String::new(),
        }
    }

    #[test]
    fn test_registration_validation() {
        assert!(validate_registration(&request("a@example.com", "longenough", "longenough")).is_ok());
        assert!(validate_registration(&request("not-an-email", "longenough", "longenough")).is_err());
        assert!(validate_registration(&request("a@example.com", "short", "short")).is_err());
        assert_eq!(
            validate_registration(&request("a@example.com", "longenough", "different1")).unwrap_err(),
            "Passwords don't match"
        );
    }

    #[test]
    fn test_email_shape() {
        assert!(looks_like_email("user@example.com"));
        assert!(!looks_like_email("user@localhost"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("a@@example.com"));
        assert!(!looks_like_email("a b@example.com"));
        assert!(!looks_like_email("a@example."));
    }
}
