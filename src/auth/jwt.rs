//! JWT Token Handler
//! Mission: Generate and validate access and refresh tokens

use crate::auth::models::{Claims, RefreshClaims, TokenKind, User};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_ACCESS_LIFETIME: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_REFRESH_LIFETIME: Duration = Duration::from_secs(100 * 60);

/// JWT Handler for token operations
pub struct JwtHandler {
    secret: String,
    access_lifetime: Duration,
    refresh_lifetime: Duration,
}

impl JwtHandler {
    /// Create a new JWT handler with the default 10 min / 100 min lifetimes
    pub fn new(secret: String) -> Self {
        Self::with_lifetimes(secret, DEFAULT_ACCESS_LIFETIME, DEFAULT_REFRESH_LIFETIME)
    }

    pub fn with_lifetimes(
        secret: String,
        access_lifetime: Duration,
        refresh_lifetime: Duration,
    ) -> Self {
        Self {
            secret,
            access_lifetime,
            refresh_lifetime,
        }
    }

    pub fn refresh_lifetime(&self) -> Duration {
        self.refresh_lifetime
    }

    /// Generate an access token for a user. Returns the token and its lifetime in seconds.
    pub fn generate_access_token(&self, user: &User) -> Result<(String, usize)> {
        let iat = Utc::now().timestamp() as usize;
        let expires_in = self.access_lifetime.as_secs() as usize;

        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            exp: iat + expires_in,
            iat,
            jti: Uuid::new_v4().simple().to_string(),
            token_type: TokenKind::Access,
        };

        debug!(
            user_id = %user.id,
            role = user.role.as_str(),
            "Generating access token, expires in {}s",
            expires_in
        );

        let token = self.sign(&claims).context("Failed to generate access token")?;
        Ok((token, expires_in))
    }

    /// Generate a refresh token belonging to session lineage `family`.
    pub fn generate_refresh_token(
        &self,
        user_id: &Uuid,
        family: &str,
    ) -> Result<(String, RefreshClaims)> {
        let iat = Utc::now().timestamp() as usize;

        let claims = RefreshClaims {
            sub: user_id.to_string(),
            fam: family.to_string(),
            exp: iat + self.refresh_lifetime.as_secs() as usize,
            iat,
            jti: Uuid::new_v4().simple().to_string(),
            token_type: TokenKind::Refresh,
        };

        let token = self.sign(&claims).context("Failed to generate refresh token")?;
        Ok((token, claims))
    }

    /// Validate an access token and extract claims
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let decoded = decode::<Claims>(token, &self.decoding_key(), &self.validation())
            .context("Invalid or expired token")?;

        if decoded.claims.token_type != TokenKind::Access {
            bail!("Not an access token");
        }

        debug!("Validated access token for user {}", decoded.claims.sub);
        Ok(decoded.claims)
    }

    /// Validate a refresh token's signature, expiry and type.
    /// Whether it has already been rotated is the ledger's call, not ours.
    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshClaims> {
        let decoded = decode::<RefreshClaims>(token, &self.decoding_key(), &self.validation())
            .context("Invalid or expired refresh token")?;

        if decoded.claims.token_type != TokenKind::Refresh {
            bail!("Not a refresh token");
        }

        Ok(decoded.claims)
    }

    fn sign<T: serde::Serialize>(&self, claims: &T) -> Result<String> {
        Ok(encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?)
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(self.secret.as_bytes())
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::default();
        // Lifetimes are short; the library's 60s default leeway would stretch them noticeably.
        validation.leeway = 0;
        validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::UserRole;

    fn create_test_user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "user42@example.com".to_string(),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            password_hash: "hash".to_string(),
            role: UserRole::User,
            created_at: Utc::now().to_rfc3339(),
            last_login: None,
        }
    }

    #[test]
    fn test_access_token_generation_and_validation() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string());
        let user = create_test_user();

        let (token, expires_in) = handler.generate_access_token(&user).unwrap();
        assert!(!token.is_empty());
        assert_eq!(expires_in, 10 * 60);

        let claims = handler.validate_token(&token).unwrap();
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.role, user.role);
        assert_eq!(claims.user_id(), Some(user.id));
    }

    #[test]
    fn test_invalid_token_rejected() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string());
        assert!(handler.validate_token("invalid.token.here").is_err());
        assert!(handler.validate_refresh_token("invalid.token.here").is_err());
    }

    #[test]
    fn test_different_secrets_reject() {
        let handler1 = JwtHandler::new("secret1".to_string());
        let handler2 = JwtHandler::new("secret2".to_string());
        let user = create_test_user();

        let (token, _) = handler1.generate_access_token(&user).unwrap();
        assert!(handler2.validate_token(&token).is_err());
    }

    #[test]
    fn test_token_kinds_not_interchangeable() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string());
        let user = create_test_user();

        let (access, _) = handler.generate_access_token(&user).unwrap();
        let (refresh, _) = handler.generate_refresh_token(&user.id, "fam-1").unwrap();

        assert!(handler.validate_refresh_token(&access).is_err());
        assert!(handler.validate_token(&refresh).is_err());
        assert!(handler.validate_refresh_token(&refresh).is_ok());
    }

    #[test]
    fn test_refresh_token_claims() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string());
        let user = create_test_user();

        let (token, issued) = handler.generate_refresh_token(&user.id, "fam-1").unwrap();
        let claims = handler.validate_refresh_token(&token).unwrap();

        assert_eq!(claims.jti, issued.jti);
        assert_eq!(claims.fam, "fam-1");
        assert_eq!(claims.exp - claims.iat, 100 * 60);
    }

    #[test]
    fn test_expired_token_rejected() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string());
        let now = Utc::now().timestamp() as usize;

        let stale = RefreshClaims {
            sub: Uuid::new_v4().to_string(),
            fam: "fam".to_string(),
            exp: now - 5,
            iat: now - 600,
            jti: "old".to_string(),
            token_type: TokenKind::Refresh,
        };
        let token = handler.sign(&stale).unwrap();

        assert!(handler.validate_refresh_token(&token).is_err());
    }

    #[test]
    fn test_custom_lifetimes() {
        let handler = JwtHandler::with_lifetimes(
            "s".to_string(),
            Duration::from_secs(30),
            Duration::from_secs(90),
        );
        let user = create_test_user();

        let (_, expires_in) = handler.generate_access_token(&user).unwrap();
        assert_eq!(expires_in, 30);
        assert_eq!(handler.refresh_lifetime(), Duration::from_secs(90));
    }
}
