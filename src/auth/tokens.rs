//! Token lifecycle
//! Mission: Issue, rotate and retire access/refresh token pairs
//!
//! The access token goes back in the JSON body. The refresh token only ever
//! travels in an HTTP-only cookie and is rotated on every use: the presented
//! token is blacklisted before its replacement is minted.

use crate::auth::jwt::JwtHandler;
use crate::auth::ledger::RefreshLedger;
use crate::auth::models::{User, UserRole};
use crate::auth::user_store::UserDirectory;
use crate::error::ApiError;
use axum_extra::extract::cookie::{Cookie, SameSite};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub const REFRESH_COOKIE: &str = "refresh_token";

/// Freshly minted credentials
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub expires_in: usize,
    pub refresh_token: String,
    pub role: UserRole,
}

#[derive(Debug)]
pub enum TokenError {
    /// No refresh token was presented
    Missing,
    /// Bad signature, wrong token type or expired
    Invalid,
    /// Already rotated or never issued by us
    Revoked,
    /// Token subject no longer exists
    UnknownUser,
    Internal(anyhow::Error),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Missing => write!(f, "Refresh token not found in cookies"),
            TokenError::Invalid => write!(f, "Invalid or expired refresh token"),
            TokenError::Revoked => write!(f, "Refresh token has been revoked"),
            TokenError::UnknownUser => write!(f, "Refresh token subject not found"),
            TokenError::Internal(e) => write!(f, "Token store error: {}", e),
        }
    }
}

impl std::error::Error for TokenError {}

impl From<anyhow::Error> for TokenError {
    fn from(err: anyhow::Error) -> Self {
        TokenError::Internal(err)
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Missing => ApiError::Unauthorized("Refresh token not found in cookies"),
            TokenError::Invalid | TokenError::Revoked | TokenError::UnknownUser => {
                ApiError::Unauthorized("Invalid or expired refresh token")
            }
            TokenError::Internal(e) => ApiError::Internal(e),
        }
    }
}

/// Cookie attributes for the refresh token
#[derive(Debug, Clone)]
pub struct CookieSettings {
    /// Only set in production, where the site is served over HTTPS
    pub secure: bool,
    pub path: String,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            secure: false,
            path: "/".to_string(),
        }
    }
}

pub struct TokenLifecycle {
    jwt: Arc<JwtHandler>,
    ledger: Arc<dyn RefreshLedger>,
    users: Arc<dyn UserDirectory>,
    cookie: CookieSettings,
    revoke_on_logout: bool,
}

impl TokenLifecycle {
    pub fn new(
        jwt: Arc<JwtHandler>,
        ledger: Arc<dyn RefreshLedger>,
        users: Arc<dyn UserDirectory>,
        cookie: CookieSettings,
    ) -> Self {
        Self {
            jwt,
            ledger,
            users,
            cookie,
            revoke_on_logout: false,
        }
    }

    /// Also blacklist the presented refresh cookie on logout.
    pub fn with_revoke_on_logout(mut self, revoke: bool) -> Self {
        self.revoke_on_logout = revoke;
        self
    }

    /// Start a new session lineage for a user whose password was just verified.
    pub async fn issue(&self, user: &User) -> Result<TokenPair, TokenError> {
        let family = Uuid::new_v4().simple().to_string();
        let pair = self.mint(user, &family).await?;
        info!(user_id = %user.id, family = %family, "Issued token pair");
        Ok(pair)
    }

    /// Rotate a refresh token. The presented token is blacklisted first, so a
    /// second call with the same token (or a concurrent one) is rejected.
    pub async fn refresh(&self, presented: Option<&str>) -> Result<TokenPair, TokenError> {
        let token = presented
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(TokenError::Missing)?;

        let claims = self
            .jwt
            .validate_refresh_token(token)
            .map_err(|_| TokenError::Invalid)?;

        if !self.ledger.consume(&claims.jti).await? {
            warn!(
                user_id = %claims.sub,
                family = %claims.fam,
                "Rejected reuse of a rotated or unknown refresh token"
            );
            return Err(TokenError::Revoked);
        }

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| TokenError::Invalid)?;
        let user = self
            .users
            .find_by_id(&user_id)?
            .ok_or(TokenError::UnknownUser)?;

        let pair = self.mint(&user, &claims.fam).await?;
        info!(user_id = %user.id, family = %claims.fam, "Rotated refresh token");
        Ok(pair)
    }

    /// End the session on this client. Clearing the cookie is all that is
    /// required; the token is only blacklisted when `revoke_on_logout` is set.
    pub async fn logout(&self, presented: Option<&str>) -> Result<(), TokenError> {
        if !self.revoke_on_logout {
            return Ok(());
        }

        let Some(token) = presented.filter(|t| !t.is_empty()) else {
            return Ok(());
        };

        // An unreadable cookie has nothing left to revoke.
        if let Ok(claims) = self.jwt.validate_refresh_token(token) {
            self.ledger.consume(&claims.jti).await?;
        }
        Ok(())
    }

    /// Cookie carrying a pair's refresh token
    pub fn refresh_cookie(&self, pair: &TokenPair) -> Cookie<'static> {
        Cookie::build((REFRESH_COOKIE, pair.refresh_token.clone()))
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.cookie.secure)
            .path(self.cookie.path.clone())
            .max_age(max_age(self.jwt.refresh_lifetime()))
            .build()
    }

    /// Expired, empty cookie that makes the browser drop the refresh token
    pub fn clear_cookie(&self) -> Cookie<'static> {
        Cookie::build((REFRESH_COOKIE, ""))
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.cookie.secure)
            .path(self.cookie.path.clone())
            .removal()
            .build()
    }

    pub async fn purge_expired(&self, now: i64) -> anyhow::Result<usize> {
        self.ledger.purge_expired(now).await
    }

    async fn mint(&self, user: &User, family: &str) -> Result<TokenPair, TokenError> {
        let (access_token, expires_in) = self.jwt.generate_access_token(user)?;
        let (refresh_token, refresh_claims) = self.jwt.generate_refresh_token(&user.id, family)?;
        self.ledger.record(&refresh_claims).await?;

        Ok(TokenPair {
            access_token,
            expires_in,
            refresh_token,
            role: user.role,
        })
    }
}

fn max_age(lifetime: Duration) -> cookie::time::Duration {
    cookie::time::Duration::seconds(lifetime.as_secs() as i64)
}
