//! SQLite persistence for the vault.
//!
//! One connection behind a mutex. Callers hold the lock only for the
//! duration of a closure passed to [`Store::with_conn`] or
//! [`Store::with_transaction`]. Key derivation stays outside the closures.

pub mod circles;
pub mod keys;
pub mod legacy;
pub mod members;
pub mod migrations;
pub mod records;
pub mod rekey;
pub mod settings;
pub mod trustees;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use circlevault_shared::error::VaultError;
use rusqlite::{Connection, Transaction};

pub struct Store {
    conn: Mutex<Connection>,
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA foreign_keys=ON;
         PRAGMA busy_timeout=5000;",
    )
}

impl Store {
    /// Open (or create) the database at `path`; ":memory:" opens a private in-memory database.
    pub fn open(path: &str) -> Result<Self, VaultError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(Path::new(path))?
        };
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, VaultError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, VaultError> {
        configure_connection(&conn)?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, VaultError>,
    ) -> Result<T, VaultError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| VaultError::Database("connection lock poisoned".into()))?;
        f(&conn)
    }

    /// Run `f` inside a transaction. Any error rolls the whole closure back.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, VaultError>,
    ) -> Result<T, VaultError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| VaultError::Database("connection lock poisoned".into()))?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Current time as stored in every timestamp column.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
