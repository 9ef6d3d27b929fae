//! Signal rows: SQL access and the `SignalStore` implementation for `SignalDb`.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use rusqlite::types::{ToSql, Type};

use super::{DbError, SignalDb};
use crate::error::SignalError;
use crate::signals::record::Signal;
use crate::signals::store::{QueryOrder, SignalQuery, SignalStore};

const SIGNAL_COLUMNS: &str = "id, user_id, entry_id, key, value, confidence, model, version,
     generated_at, expires_at, trigger_capture_id, source_window_days, llm_run_id";

/// Fixed-width RFC 3339 so lexical order in SQLite matches time order.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl SignalDb {
    /// Map a row to Signal. Expects columns in `SIGNAL_COLUMNS` order.
    fn map_signal_row(row: &rusqlite::Row) -> rusqlite::Result<Signal> {
        let generated_at: String = row.get(8)?;
        let expires_at: Option<String> = row.get(9)?;
        Ok(Signal {
            id: row.get(0)?,
            user_id: row.get(1)?,
            entry_id: row.get(2)?,
            key: row.get(3)?,
            value: row.get(4)?,
            confidence: row.get(5)?,
            model: row.get(6)?,
            version: row.get(7)?,
            generated_at: parse_ts(8, &generated_at)?,
            expires_at: expires_at.as_deref().map(|raw| parse_ts(9, raw)).transpose()?,
            trigger_capture_id: row.get(10)?,
            source_window_days: row.get(11)?,
            llm_run_id: row.get(12)?,
        })
    }

    /// Highest version in the partition, 0 when empty.
    pub fn max_signal_version(
        &self,
        user_id: &str,
        entry_id: &str,
        key: &str,
    ) -> Result<u32, DbError> {
        let max: u32 = self.conn_ref().query_row(
            "SELECT COALESCE(MAX(version), 0) FROM signals
             WHERE user_id = ?1 AND entry_id = ?2 AND key = ?3",
            params![user_id, entry_id, key],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    /// Insert a signal row.
    pub fn insert_signal(&self, signal: &Signal) -> Result<(), DbError> {
        self.conn_ref().execute(
            "INSERT INTO signals
                (id, user_id, entry_id, key, value, confidence, model, version,
                 generated_at, expires_at, trigger_capture_id, source_window_days, llm_run_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                signal.id,
                signal.user_id,
                signal.entry_id,
                signal.key,
                signal.value,
                signal.confidence,
                signal.model,
                signal.version,
                format_ts(&signal.generated_at),
                signal.expires_at.as_ref().map(format_ts),
                signal.trigger_capture_id,
                signal.source_window_days,
                signal.llm_run_id,
            ],
        )?;
        Ok(())
    }

    /// Query a user's signals with every filter in `query` applied in SQL.
    pub fn query_signals(
        &self,
        user_id: &str,
        query: &SignalQuery,
    ) -> Result<Vec<Signal>, DbError> {
        let mut sql = format!("SELECT {SIGNAL_COLUMNS} FROM signals WHERE user_id = ?1");
        let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(user_id.to_string())];

        let mut filter = |clause: &str, value: Box<dyn ToSql>| {
            values.push(value);
            sql.push_str(&format!(" AND {clause} ?{}", values.len()));
        };

        if let Some(entry_id) = &query.entry_id {
            filter("entry_id =", Box::new(entry_id.clone()));
        }
        if let Some(key) = &query.key {
            filter("key =", Box::new(key.clone()));
        }
        if let Some(since) = &query.since {
            filter("generated_at >=", Box::new(format_ts(since)));
        }
        if let Some(until) = &query.until {
            filter("generated_at <", Box::new(format_ts(until)));
        }
        if let Some(min_version) = query.min_version {
            filter("version >=", Box::new(min_version));
        }
        if let Some(run) = &query.llm_run_id {
            filter("llm_run_id =", Box::new(run.clone()));
        }
        if let Some(capture) = &query.trigger_capture_id {
            filter("trigger_capture_id =", Box::new(capture.clone()));
        }
        if let Some(active_at) = &query.active_at {
            filter("(expires_at IS NULL OR expires_at >", Box::new(format_ts(active_at)));
            sql.push(')');
        }

        sql.push_str(match query.order {
            QueryOrder::Insertion => " ORDER BY seq ASC",
            QueryOrder::NewestFirst => " ORDER BY seq DESC",
        });
        if let Some(limit) = query.limit {
            values.push(Box::new(i64::try_from(limit).unwrap_or(i64::MAX)));
            sql.push_str(&format!(" LIMIT ?{}", values.len()));
        }

        let mut stmt = self.conn_ref().prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), Self::map_signal_row)?;

        let mut signals = Vec::new();
        for row in rows {
            signals.push(row?);
        }
        Ok(signals)
    }

    /// Look up a single signal by id.
    pub fn get_signal(&self, id: &str) -> Result<Option<Signal>, DbError> {
        let sql = format!("SELECT {SIGNAL_COLUMNS} FROM signals WHERE id = ?1");
        match self.conn_ref().query_row(&sql, params![id], Self::map_signal_row) {
            Ok(signal) => Ok(Some(signal)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::Sqlite(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

impl From<DbError> for SignalError {
    fn from(err: DbError) -> Self {
        SignalError::StoreWrite(err.to_string())
    }
}

/// Nesting `atomically` on one `SignalDb` is not supported: SQLite refuses a
/// second `BEGIN` on the same connection.
impl SignalStore for SignalDb {
    fn get_max_version(
        &self,
        user_id: &str,
        entry_id: &str,
        key: &str,
    ) -> Result<u32, SignalError> {
        self.max_signal_version(user_id, entry_id, key)
            .map_err(|e| SignalError::StoreRead(e.to_string()))
    }

    fn create(&self, signal: &Signal) -> Result<(), SignalError> {
        self.insert_signal(signal).map_err(|e| {
            if e.is_version_conflict() {
                SignalError::VersionConflict {
                    partition: signal.partition().to_string(),
                    version: signal.version,
                }
            } else {
                SignalError::StoreWrite(e.to_string())
            }
        })
    }

    fn get(&self, user_id: &str, query: &SignalQuery) -> Result<Vec<Signal>, SignalError> {
        self.query_signals(user_id, query)
            .map_err(|e| SignalError::StoreRead(e.to_string()))
    }

    fn atomically<T, F>(&self, f: F) -> Result<T, SignalError>
    where
        F: FnOnce(&Self) -> Result<T, SignalError>,
    {
        self.with_transaction(f)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::TimeZone;

    use super::*;
    use crate::db::test_utils::{test_db, test_db_path};
    use crate::signals::clock::{FixedClock, SequentialIds};
    use crate::signals::record::{Observation, Provenance};
    use crate::signals::versioning::{BatchMode, SignalEngine};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()
    }

    fn sample(id: &str, entry: &str, key: &str, version: u32, hour: u32) -> Signal {
        Signal {
            id: id.to_string(),
            user_id: "u1".to_string(),
            entry_id: entry.to_string(),
            key: key.to_string(),
            value: 0.25,
            confidence: 0.75,
            model: "m1".to_string(),
            version,
            generated_at: at(hour),
            expires_at: None,
            trigger_capture_id: None,
            source_window_days: None,
            llm_run_id: None,
        }
    }

    #[test]
    fn test_insert_and_read_back_exactly() {
        let db = test_db();
        let mut signal = sample("sig-a", "e1", "mood", 1, 9);
        signal.expires_at = Some(at(20));
        signal.trigger_capture_id = Some("cap-1".to_string());
        signal.source_window_days = Some(14);
        signal.llm_run_id = Some("run-1".to_string());
        db.create(&signal).expect("create");

        let read = db.get_signal("sig-a").expect("get").expect("exists");
        assert_eq!(read, signal);
        assert!(db.get_signal("missing").expect("get").is_none());
    }

    #[test]
    fn test_max_version_per_partition() {
        let db = test_db();
        assert_eq!(db.get_max_version("u1", "e1", "mood").expect("max"), 0);
        db
            .create(&sample("a", "e1", "mood", 1, 9))
            .expect("create");
        db
            .create(&sample("b", "e1", "mood", 2, 9))
            .expect("create");
        db
            .create(&sample("c", "e1", "sleep", 1, 9))
            .expect("create");
        assert_eq!(db.get_max_version("u1", "e1", "mood").expect("max"), 2);
        assert_eq!(db.get_max_version("u1", "e1", "sleep").expect("max"), 1);
        assert_eq!(db.get_max_version("u2", "e1", "mood").expect("max"), 0);
    }

    #[test]
    fn test_duplicate_version_maps_to_conflict() {
        let db = test_db();
        db
            .create(&sample("a", "e1", "mood", 1, 9))
            .expect("create");
        let err = db.create(&sample("b", "e1", "mood", 1, 10)).unwrap_err();
        match err {
            SignalError::VersionConflict { partition, version } => {
                assert_eq!(partition, "u1/e1/mood");
                assert_eq!(version, 1);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_id_is_plain_write_error() {
        let db = test_db();
        db
            .create(&sample("a", "e1", "mood", 1, 9))
            .expect("create");
        let err = db.create(&sample("a", "e2", "mood", 1, 9)).unwrap_err();
        assert!(matches!(err, SignalError::StoreWrite(_)));
    }

    #[test]
    fn test_query_filters() {
        let db = test_db();
        let mut run = sample("r", "e2", "mood", 1, 11);
        run.llm_run_id = Some("run-5".to_string());
        run.trigger_capture_id = Some("cap-5".to_string());
        db
            .create(&sample("a", "e1", "mood", 1, 9))
            .expect("create");
        db
            .create(&sample("b", "e1", "mood", 2, 10))
            .expect("create");
        db.create(&run).expect("create");
        db
            .create(&sample("c", "e1", "sleep", 1, 12))
            .expect("create");
        let mut other_user = sample("x", "e1", "mood", 1, 9);
        other_user.user_id = "u2".to_string();
        db.create(&other_user).expect("create");

        let ids = |q: SignalQuery| -> Vec<String> {
            db.get("u1", &q).expect("get").into_iter().map(|s| s.id).collect()
        };

        assert_eq!(ids(SignalQuery::default()), vec!["a", "b", "r", "c"]);
        assert_eq!(ids(SignalQuery::default().entry("e1")), vec!["a", "b", "c"]);
        assert_eq!(ids(SignalQuery::default().entry("e1").key("mood")), vec!["a", "b"]);
        assert_eq!(ids(SignalQuery::default().min_version(2)), vec!["b"]);
        assert_eq!(
            ids(SignalQuery::default().between(Some(at(10)), Some(at(12)))),
            vec!["b", "r"]
        );
        assert_eq!(ids(SignalQuery::default().run("run-5")), vec!["r"]);
        assert_eq!(
            ids(SignalQuery {
                trigger_capture_id: Some("cap-5".to_string()),
                ..SignalQuery::default()
            }),
            vec!["r"]
        );
        assert_eq!(ids(SignalQuery::default().newest_first().limit(2)), vec!["c", "r"]);
    }

    #[test]
    fn test_query_active_at_excludes_expired() {
        let db = test_db();
        let mut stale = sample("stale", "e1", "mood", 1, 9);
        stale.expires_at = Some(at(10));
        db.create(&stale).expect("create");
        db
            .create(&sample("fresh", "e1", "mood", 2, 11))
            .expect("create");

        let active: Vec<String> = db
            .get("u1", &SignalQuery::default().active_at(at(10)))
            .expect("get")
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(active, vec!["fresh"]);

        let earlier = db.get("u1", &SignalQuery::default().active_at(at(9))).expect("get");
        assert_eq!(earlier.len(), 2);
    }

    #[test]
    fn test_engine_over_sqlite_mood_scenario() {
        let engine = SignalEngine::with_capabilities(
            test_db(),
            SequentialIds::new("sig"),
            FixedClock(at(9)),
        );
        let a = engine
            .add_signal("u1", "e1", "mood", 0.8, 0.9, "m1", None, None, None)
            .expect("add A");
        let b = engine
            .add_signal("u1", "e1", "mood", 0.6, 0.9, "m1", None, None, None)
            .expect("add B");

        let signals = engine
            .get_signals("u1", &SignalQuery::default().entry("e1"))
            .expect("get");
        assert_eq!(signals.len(), 2);
        assert_eq!(
            (signals[0].id.as_str(), signals[0].version, signals[0].value),
            (a.as_str(), 1, 0.8)
        );
        assert_eq!(
            (signals[1].id.as_str(), signals[1].version, signals[1].value),
            (b.as_str(), 2, 0.6)
        );
    }

    #[test]
    fn test_atomic_batch_rolls_back_in_sqlite() {
        let db = test_db();
        // Occupy the id the second observation will be given.
        db
            .create(&sample("sig-2", "seed", "seed", 1, 8))
            .expect("seed");

        let engine =
            SignalEngine::with_capabilities(db, SequentialIds::new("sig"), FixedClock(at(9)))
                .with_batch_mode(BatchMode::Atomic);
        let batch = vec![
            Observation::new("e1", "mood", 0.1, 0.5),
            Observation::new("e1", "energy", 0.2, 0.5),
        ];
        let err = engine
            .add_signals_batch("u1", &batch, "m1", &Provenance::default())
            .unwrap_err();
        assert!(err.is_store_write());

        let remaining = engine.get_signals("u1", &SignalQuery::default().entry("e1")).expect("get");
        assert!(remaining.is_empty(), "first row must be rolled back with the batch");
    }

    #[test]
    fn test_best_effort_batch_keeps_committed_rows_in_sqlite() {
        let db = test_db();
        db
            .create(&sample("sig-2", "seed", "seed", 1, 8))
            .expect("seed");

        let engine =
            SignalEngine::with_capabilities(db, SequentialIds::new("sig"), FixedClock(at(9)));
        let batch = vec![
            Observation::new("e1", "mood", 0.1, 0.5),
            Observation::new("e1", "energy", 0.2, 0.5),
            Observation::new("e1", "sleep", 0.3, 0.5),
        ];
        let err = engine
            .add_signals_batch("u1", &batch, "m1", &Provenance::default())
            .unwrap_err();
        assert_eq!(err.committed_ids(), ["sig-1".to_string()]);

        let stored = engine.get_signals("u1", &SignalQuery::default().entry("e1")).expect("get");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, "sig-1");
    }

    #[test]
    fn test_concurrent_connections_allocate_distinct_versions() {
        let path = test_db_path();
        // Migrate once up front so workers only contend on signal writes.
        drop(SignalDb::open_at(path.clone()).expect("create db"));

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let engine = SignalEngine::new(SignalDb::open_at(path).expect("open"));
                    for i in 0..5 {
                        let value = (worker * 10 + i) as f64;
                        engine
                            .add_signal("u1", "e1", "mood", value, 0.5, "m1", None, None, None)
                            .expect("add");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }

        let db = SignalDb::open_at(path).expect("reopen");
        let stored = db
            .get("u1", &SignalQuery::default().entry("e1").key("mood"))
            .expect("get");
        let versions: BTreeSet<u32> = stored.iter().map(|s| s.version).collect();
        assert_eq!(stored.len(), 20);
        assert_eq!(versions, (1..=20).collect::<BTreeSet<u32>>());
    }
}
