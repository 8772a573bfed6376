//! SQLite connection helpers shared by the stores.
//!
//! Every store opens a short-lived connection per operation. The busy timeout
//! lets concurrent writers queue on SQLite's file lock instead of failing fast.

use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn open(db_path: &str) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path))?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

/// Run `f` inside a `BEGIN IMMEDIATE` transaction.
///
/// Taking the write lock up front means contending writers wait in the busy
/// handler; a deferred transaction upgrading from a read lock can instead fail
/// with SQLITE_BUSY straight away.
pub fn write<T>(db_path: &str, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
    let mut conn = open(db_path)?;
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("Failed to begin write transaction")?;
    let out = f(&tx)?;
    tx.commit().context("Failed to commit write transaction")?;
    Ok(out)
}
