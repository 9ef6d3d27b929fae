use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("{0}")]
    Transaction(String),
}

impl DbError {
    /// True when SQLite rejected the statement on a constraint (UNIQUE, CHECK,
    /// NOT NULL, or an aborting trigger).
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }

    /// True for the per-partition version uniqueness constraint.
    pub fn is_version_conflict(&self) -> bool {
        self.is_constraint_violation() && self.to_string().contains("signals.version")
    }
}
