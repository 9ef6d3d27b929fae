//! SQLite-backed signal store.
//!
//! The database lives at `~/.reflect/signals.db` unless `databasePath` is set in
//! config. Signals are append-only: the schema rejects UPDATE and DELETE on the
//! `signals` table, and `(user_id, entry_id, key, version)` is unique so a
//! second writer racing for the same version gets a constraint failure instead
//! of a duplicate row.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::Connection;

use crate::config::Config;

pub mod signals;
pub mod types;
pub use types::*;

/// How long a writer waits on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

pub struct SignalDb {
    conn: Connection,
}

impl SignalDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite write transaction.
    ///
    /// `BEGIN IMMEDIATE` takes the database write lock up front, so every
    /// connection to the same file (other threads or other processes) queues
    /// behind it. Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| {
                E::from(DbError::Transaction(format!("Failed to begin transaction: {e}")))
            })?;
        match f(self) {
            Ok(val) => {
                if let Err(e) = self.conn.execute_batch("COMMIT") {
                    let _ = self.conn.execute_batch("ROLLBACK");
                    return Err(E::from(DbError::Transaction(format!(
                        "Failed to commit transaction: {e}"
                    ))));
                }
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database named by `config` and apply the schema.
    pub fn open(config: &Config) -> Result<Self, DbError> {
        let path = Self::db_path(config)?;
        Self::open_with_timeout(path, Duration::from_millis(config.busy_timeout_ms))
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        Self::open_with_timeout(path, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
    }

    fn open_with_timeout(path: PathBuf, busy_timeout: Duration) -> Result<Self, DbError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(busy_timeout)?;

        // WAL lets readers proceed while a writer holds the lock
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        log::debug!("Opened signal database at {}", path.display());
        Ok(Self { conn })
    }

    /// Resolve the database path: `databasePath` from config, otherwise
    /// `~/.reflect/signals.db`.
    pub fn db_path(config: &Config) -> Result<PathBuf, DbError> {
        if let Some(path) = config.database_path.as_deref().filter(|p| !p.trim().is_empty()) {
            return Ok(PathBuf::from(path));
        }
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".reflect").join("signals.db"))
    }
}

// =============================================================================
// Shared test utilities
// =============================================================================
