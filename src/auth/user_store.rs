//! User Storage
//! Mission: Securely store and manage user accounts with SQLite

use crate::auth::models::{User, UserRole};
use crate::db;
use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use rusqlite::{params, types::Type, ErrorCode, Row};
use tracing::{info, warn};
use uuid::Uuid;

/// Read access to users by id. The request gate and the token lifecycle
/// call through this to see a user's *current* role and email.
pub trait UserDirectory: Send + Sync {
    fn find_by_id(&self, id: &Uuid) -> Result<Option<User>>;
}

/// Fields supplied at registration
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

/// User storage with SQLite backend
pub struct UserStore {
    db_path: String,
    bcrypt_cost: u32,
}

const USER_COLUMNS: &str =
    "id, email, first_name, last_name, password_hash, role, created_at, last_login";

impl UserStore {
    /// Create a new user store and initialize database
    pub fn new(db_path: &str) -> Result<Self> {
        Self::with_cost(db_path, DEFAULT_COST)
    }

    /// Same as `new` with an explicit bcrypt cost (tests use the minimum).
    pub fn with_cost(db_path: &str, bcrypt_cost: u32) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
            bcrypt_cost,
        };
        store.init_db()?;
        Ok(store)
    }

    fn init_db(&self) -> Result<()> {
        let conn = db::open(&self.db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_login TEXT
            )",
            [],
        )?;

        Ok(())
    }

    /// Create the bootstrap admin if no admin exists yet. Returns true when one was created.
    pub fn ensure_admin(&self, email: &str, password: &str) -> Result<bool> {
        let conn = db::open(&self.db_path)?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE role = 'admin'",
                [],
                |row| row.get(0),
            )
            .context("Failed to check for admin users")?;

        if count > 0 {
            return Ok(false);
        }

        let created = self.create_user(
            NewUser {
                email: email.to_string(),
                password: password.to_string(),
                first_name: String::new(),
                last_name: String::new(),
            },
            UserRole::Admin,
        )?;

        match created {
            Some(admin) => {
                info!(email = %admin.email, "Bootstrap admin user created");
                Ok(true)
            }
            None => {
                warn!(email = %email, "Bootstrap admin email is taken by a non-admin account");
                Ok(false)
            }
        }
    }

    /// Create a new user. Returns `None` when the email is already registered.
    pub fn create_user(&self, new_user: NewUser, role: UserRole) -> Result<Option<User>> {
        let password_hash =
            hash(&new_user.password, self.bcrypt_cost).context("Failed to hash password")?;

        let user = User {
            id: Uuid::new_v4(),
            email: normalize_email(&new_user.email),
            first_name: new_user.first_name.trim().to_string(),
            last_name: new_user.last_name.trim().to_string(),
            password_hash,
            role,
            created_at: Utc::now().to_rfc3339(),
            last_login: None,
        };

        let conn = db::open(&self.db_path)?;
        let inserted = conn.execute(
            "INSERT INTO users (id, email, first_name, last_name, password_hash, role, created_at, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user.id.to_string(),
                user.email,
                user.first_name,
                user.last_name,
                user.password_hash,
                user.role.as_str(),
                user.created_at,
                user.last_login,
            ],
        );

        match inserted {
            Ok(_) => {
                info!(user_id = %user.id, role = user.role.as_str(), "Created user");
                Ok(Some(user))
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to insert user"),
        }
    }

    /// Get user by email (case-insensitive)
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = db::open(&self.db_path)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users WHERE email = ?1",
            USER_COLUMNS
        ))?;

        match stmt.query_row(params![normalize_email(email)], row_to_user) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Get user by id
    pub fn get_user_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        let conn = db::open(&self.db_path)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users WHERE id = ?1",
            USER_COLUMNS
        ))?;

        match stmt.query_row(params![id.to_string()], row_to_user) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Verify email and password. Returns the user on success.
    pub fn verify_password(&self, email: &str, password: &str) -> Result<Option<User>> {
        match self.get_user_by_email(email)? {
            Some(user) => {
                let valid =
                    verify(password, &user.password_hash).context("Failed to verify password")?;
                Ok(valid.then_some(user))
            }
            None => Ok(None),
        }
    }

    /// Stamp the user's last successful login
    pub fn record_login(&self, id: &Uuid) -> Result<()> {
        let conn = db::open(&self.db_path)?;
        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id.to_string()],
        )?;
        Ok(())
    }

    /// Change a user's role (promotion/demotion)
    pub fn set_role(&self, id: &Uuid, role: UserRole) -> Result<()> {
        let conn = db::open(&self.db_path)?;
        let rows_affected = conn.execute(
            "UPDATE users SET role = ?1 WHERE id = ?2",
            params![role.as_str(), id.to_string()],
        )?;

        if rows_affected == 0 {
            anyhow::bail!("User not found");
        }

        info!(user_id = %id, role = role.as_str(), "Changed user role");
        Ok(())
    }
}

impl UserDirectory for UserStore {
    fn find_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        self.get_user_by_id(id)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let role_str: String = row.get(5)?;
    Ok(User {
        id: Uuid::parse_str(&id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        password_hash: row.get(4)?,
        role: UserRole::parse(&role_str).unwrap_or(UserRole::User),
        created_at: row.get(6)?,
        last_login: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (UserStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        let store = UserStore::with_cost(db_path, 4).unwrap();
        (store, temp_file)
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password: "password123".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
        }
    }

    #[test]
    fn test_create_and_retrieve_user() {
        let (store, _temp) = create_test_store();

        let user = store
            .create_user(new_user("Ada@Example.com "), UserRole::User)
            .unwrap()
            .unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.role, UserRole::User);

        let by_email = store.get_user_by_email("ADA@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, user.id);

        let by_id = store.get_user_by_id(&user.id).unwrap().unwrap();
        assert_eq!(by_id.first_name, "Ada");
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let (store, _temp) = create_test_store();

        assert!(store
            .create_user(new_user("dup@example.com"), UserRole::User)
            .unwrap()
            .is_some());
        assert!(store
            .create_user(new_user("DUP@example.com"), UserRole::User)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_password_verification() {
        let (store, _temp) = create_test_store();
        store
            .create_user(new_user("ada@example.com"), UserRole::User)
            .unwrap();

        assert!(store
            .verify_password("ada@example.com", "password123")
            .unwrap()
            .is_some());
        assert!(store
            .verify_password("ada@example.com", "wrongpassword")
            .unwrap()
            .is_none());
        assert!(store
            .verify_password("nobody@example.com", "password123")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_ensure_admin_only_once() {
        let (store, _temp) = create_test_store();

        assert!(store.ensure_admin("root@example.com", "adminpass1").unwrap());
        assert!(!store.ensure_admin("other@example.com", "adminpass1").unwrap());

        let admin = store.get_user_by_email("root@example.com").unwrap().unwrap();
        assert_eq!(admin.role, UserRole::Admin);
        assert!(store.get_user_by_email("other@example.com").unwrap().is_none());
    }

    #[test]
    fn test_set_role_and_record_login() {
        let (store, _temp) = create_test_store();
        let user = store
            .create_user(new_user("ada@example.com"), UserRole::User)
            .unwrap()
            .unwrap();

        store.set_role(&user.id, UserRole::Admin).unwrap();
        store.record_login(&user.id).unwrap();

        let reloaded = store.find_by_id(&user.id).unwrap().unwrap();
        assert_eq!(reloaded.role, UserRole::Admin);
        assert!(reloaded.last_login.is_some());

        assert!(store.set_role(&Uuid::new_v4(), UserRole::Admin).is_err());
    }
}
