//! Refresh token ledger
//!
//! Records every refresh token we mint (`outstanding_tokens`) and every token
//! that has been rotated out (`blacklisted_tokens`). A refresh token is usable
//! only while it is outstanding and not blacklisted, so at most one token per
//! session lineage is live at any time.

use crate::auth::models::RefreshClaims;
use crate::db;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use tracing::debug;

#[async_trait]
pub trait RefreshLedger: Send + Sync {
    /// Remember a freshly minted refresh token as valid.
    async fn record(&self, claims: &RefreshClaims) -> Result<()>;

    /// Atomically blacklist `jti`. Returns `true` for exactly one caller, and only
    /// if the token was recorded and not yet blacklisted.
    async fn consume(&self, jti: &str) -> Result<bool>;

    async fn is_blacklisted(&self, jti: &str) -> Result<bool>;

    /// Drop ledger rows whose token expired before `now` (unix seconds).
    async fn purge_expired(&self, now: i64) -> Result<usize>;
}

/// SQLite-backed ledger, sharing the application database file.
pub struct SqliteRefreshLedger {
    db_path: String,
}

impl SqliteRefreshLedger {
    pub fn new(db_path: &str) -> Result<Self> {
        let ledger = Self {
            db_path: db_path.to_string(),
        };
        ledger.init_db()?;
        Ok(ledger)
    }

    fn init_db(&self) -> Result<()> {
        let conn = db::open(&self.db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS outstanding_tokens (
                jti TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                family TEXT NOT NULL,
                issued_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blacklisted_tokens (
                jti TEXT PRIMARY KEY REFERENCES outstanding_tokens(jti) ON DELETE CASCADE,
                blacklisted_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_outstanding_expires ON outstanding_tokens(expires_at)",
            [],
        )?;

        Ok(())
    }
}

#[async_trait]
impl RefreshLedger for SqliteRefreshLedger {
    async fn record(&self, claims: &RefreshClaims) -> Result<()> {
        db::write(&self.db_path, |tx| {
            tx.execute(
                "INSERT INTO outstanding_tokens (jti, user_id, family, issued_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    claims.jti,
                    claims.sub,
                    claims.fam,
                    claims.iat as i64,
                    claims.exp as i64,
                ],
            )
            .context("Failed to record refresh token")?;
            Ok(())
        })
    }

    async fn consume(&self, jti: &str) -> Result<bool> {
        // Check and mark in one statement under the write lock: only one caller can insert the row.
        let changed = db::write(&self.db_path, |tx| {
            tx.execute(
                "INSERT OR IGNORE INTO blacklisted_tokens (jti, blacklisted_at)
                 SELECT jti, ?2 FROM outstanding_tokens WHERE jti = ?1",
                params![jti, Utc::now().timestamp()],
            )
            .context("Failed to blacklist refresh token")
        })?;

        debug!(jti = %jti, consumed = changed == 1, "Refresh token consume attempt");
        Ok(changed == 1)
    }

    async fn is_blacklisted(&self, jti: &str) -> Result<bool> {
        let conn = db::open(&self.db_path)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM blacklisted_tokens WHERE jti = ?1",
            params![jti],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn purge_expired(&self, now: i64) -> Result<usize> {
        db::write(&self.db_path, |tx| {
            tx.execute(
                "DELETE FROM outstanding_tokens WHERE expires_at < ?1",
                params![now],
            )
            .context("Failed to purge expired refresh tokens")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::TokenKind;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn claims(jti: &str, exp: i64) -> RefreshClaims {
        RefreshClaims {
            sub: "user-1".to_string(),
            fam: "fam-1".to_string(),
            exp: exp as usize,
            iat: (exp - 6000) as usize,
            jti: jti.to_string(),
            token_type: TokenKind::Refresh,
        }
    }

    fn create_ledger() -> (SqliteRefreshLedger, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let ledger = SqliteRefreshLedger::new(temp_file.path().to_str().unwrap()).unwrap();
        (ledger, temp_file)
    }

    #[tokio::test]
    async fn test_consume_succeeds_once() {
        let (ledger, _temp) = create_ledger();
        let future = Utc::now().timestamp() + 6000;
        ledger.record(&claims("a", future)).await.unwrap();

        assert!(!ledger.is_blacklisted("a").await.unwrap());
        assert!(ledger.consume("a").await.unwrap());
        assert!(ledger.is_blacklisted("a").await.unwrap());
        assert!(!ledger.consume("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_token_not_consumable() {
        let (ledger, _temp) = create_ledger();
        assert!(!ledger.consume("never-issued").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consume_single_winner() {
        let (ledger, _temp) = create_ledger();
        let ledger = Arc::new(ledger);
        ledger
            .record(&claims("shared", Utc::now().timestamp() + 6000))
            .await
            .unwrap();

        let attempts = (0..8).map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.consume("shared").await.unwrap() })
        });
        let results = futures_util::future::join_all(attempts).await;

        let winners = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (ledger, _temp) = create_ledger();
        let now = Utc::now().timestamp();
        ledger.record(&claims("old", now - 10)).await.unwrap();
        ledger.record(&claims("live", now + 6000)).await.unwrap();
        assert!(ledger.consume("old").await.unwrap());

        let removed = ledger.purge_expired(now).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!ledger.is_blacklisted("old").await.unwrap());
        assert!(ledger.consume("live").await.unwrap());
    }
}
