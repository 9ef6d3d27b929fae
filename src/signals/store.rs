//! Signal store contract and the in-memory store.
//!
//! The versioning engine only ever talks to a `SignalStore`. Any store that can
//! answer the per-partition max version, append a row, run a filtered read,
//! and serialize version allocation inside `atomically` conforms. `SignalDb`
//! (SQLite) lives in `crate::db::signals`.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};

use super::clock::stored_precision;
use super::record::Signal;
use crate::error::SignalError;

pub trait SignalStore {
    /// Highest stored version for the partition, or 0 when it has none.
    fn get_max_version(&self, user_id: &str, entry_id: &str, key: &str)
        -> Result<u32, SignalError>;

    /// Append one fully populated record.
    fn create(&self, signal: &Signal) -> Result<(), SignalError>;

    /// Signals owned by `user_id` that match `query`.
    fn get(&self, user_id: &str, query: &SignalQuery) -> Result<Vec<Signal>, SignalError>;

    /// Run `f` with version allocation serialized against every other writer
    /// of this store. Writes made inside `f` are kept only if it returns `Ok`.
    fn atomically<T, F>(&self, f: F) -> Result<T, SignalError>
    where
        F: FnOnce(&Self) -> Result<T, SignalError>;
}

// ---------------------------------------------------------------------------
// Query options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryOrder {
    #[default]
    Insertion,
    NewestFirst,
}

/// Filter options for `SignalStore::get`. Every unset field matches all rows.
///
/// `since` is inclusive and `until` exclusive on `generated_at`. `active_at`
/// drops signals whose `expires_at` is at or before that instant. Time bounds
/// are compared at microsecond precision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignalQuery {
    pub entry_id: Option<String>,
    pub key: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub min_version: Option<u32>,
    pub llm_run_id: Option<String>,
    pub trigger_capture_id: Option<String>,
    pub active_at: Option<DateTime<Utc>>,
    pub order: QueryOrder,
    pub limit: Option<usize>,
}

impl SignalQuery {
    pub fn entry(mut self, entry_id: &str) -> Self {
        self.entry_id = Some(entry_id.to_string());
        self
    }

    pub fn key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn min_version(mut self, version: u32) -> Self {
        self.min_version = Some(version);
        self
    }

    pub fn run(mut self, llm_run_id: &str) -> Self {
        self.llm_run_id = Some(llm_run_id.to_string());
        self
    }

    pub fn active_at(mut self, at: DateTime<Utc>) -> Self {
        self.active_at = Some(at);
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.order = QueryOrder::NewestFirst;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Field-level match, ignoring ownership, ordering and limit.
    pub fn matches(&self, signal: &Signal) -> bool {
        if self.entry_id.as_deref().is_some_and(|e| e != signal.entry_id) {
            return false;
        }
        if self.key.as_deref().is_some_and(|k| k != signal.key) {
            return false;
        }
        if self
            .since
            .is_some_and(|since| signal.generated_at < stored_precision(since))
        {
            return false;
        }
        if self
            .until
            .is_some_and(|until| signal.generated_at >= stored_precision(until))
        {
            return false;
        }
        if self.min_version.is_some_and(|v| signal.version < v) {
            return false;
        }
        if let Some(run) = self.llm_run_id.as_deref() {
            if signal.llm_run_id.as_deref() != Some(run) {
                return false;
            }
        }
        if let Some(capture) = self.trigger_capture_id.as_deref() {
            if signal.trigger_capture_id.as_deref() != Some(capture) {
                return false;
            }
        }
        if self
            .active_at
            .is_some_and(|at| signal.is_expired_at(stored_precision(at)))
        {
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local store. Rows are kept in insertion order.
///
/// `write_gate` is reentrant so `create` can take it both on its own and from
/// inside an `atomically` scope on the same thread.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<Signal>>,
    write_gate: ReentrantMutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SignalStore for MemoryStore {
    fn get_max_version(
        &self,
        user_id: &str,
        entry_id: &str,
        key: &str,
    ) -> Result<u32, SignalError> {
        let rows = self.rows.lock();
        Ok(rows
            .iter()
            .filter(|s| s.user_id == user_id && s.entry_id == entry_id && s.key == key)
            .map(|s| s.version)
            .max()
            .unwrap_or(0))
    }

    fn create(&self, signal: &Signal) -> Result<(), SignalError> {
        let _gate = self.write_gate.lock();
        let mut rows = self.rows.lock();

        if rows.iter().any(|s| s.id == signal.id) {
            return Err(SignalError::StoreWrite(format!(
                "signal id {} already exists",
                signal.id
            )));
        }
        if rows.iter().any(|s| s.partition() == signal.partition() && s.version == signal.version) {
            return Err(SignalError::VersionConflict {
                partition: signal.partition().to_string(),
                version: signal.version,
            });
        }
        rows.push(signal.clone());
        Ok(())
    }

    fn get(&self, user_id: &str, query: &SignalQuery) -> Result<Vec<Signal>, SignalError> {
        let rows = self.rows.lock();
        let matched: Box<dyn Iterator<Item = &Signal>> = match query.order {
            QueryOrder::Insertion => Box::new(rows.iter()),
            QueryOrder::NewestFirst => Box::new(rows.iter().rev()),
        };
        Ok(matched
            .filter(|s| s.user_id == user_id && query.matches(s))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn atomically<T, F>(&self, f: F) -> Result<T, SignalError>
    where
        F: FnOnce(&Self) -> Result<T, SignalError>,
    {
        let _gate = self.write_gate.lock();
        let mark = self.rows.lock().len();
        let result = f(self);
        if result.is_err() {
            self.rows.lock().truncate(mark);
        }
        result
    }
}
