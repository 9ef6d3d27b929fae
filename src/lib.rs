//! Versioned, confidence-scored signals about a journaling user.
//!
//! `signals` holds the versioning core and the store contract; `db` is the
//! SQLite store used by the application and the `reflect-signals` CLI.

pub mod config;
pub mod db;
pub mod error;
mod migrations;
pub mod signals;

pub use error::{IngestErrorReport, SignalError};

use config::Config;
use db::{DbError, SignalDb};
use signals::SignalEngine;

/// Open the configured SQLite store and wrap it in an engine carrying the
/// configured batch mode and validation policy.
pub fn open_engine(config: &Config) -> Result<SignalEngine<SignalDb>, DbError> {
    let db = SignalDb::open(config)?;
    Ok(SignalEngine::new(db)
        .with_batch_mode(config.batch_mode)
        .with_policy(config.validation_policy()))
}
