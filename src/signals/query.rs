//! Read-only views over accumulated signals.
//!
//! Reads are not isolated from concurrent writers: a result set may include a
//! version written after another row in the same set was read.

use std::collections::HashMap;

use super::clock::{stored_precision, Clock, IdGenerator};
use super::record::Signal;
use super::store::{QueryOrder, SignalQuery, SignalStore};
use super::versioning::SignalEngine;
use crate::error::SignalError;

impl<S, I, C> SignalEngine<S, I, C>
where
    S: SignalStore,
    I: IdGenerator,
    C: Clock,
{
    /// Filtered pass-through read.
    pub fn get_signals(
        &self,
        user_id: &str,
        query: &SignalQuery,
    ) -> Result<Vec<Signal>, SignalError> {
        self.policy.validate_user(user_id)?;
        self.store().get(user_id, query)
    }

    /// Every version of one partition, oldest first.
    pub fn signal_history(
        &self,
        user_id: &str,
        entry_id: &str,
        key: &str,
    ) -> Result<Vec<Signal>, SignalError> {
        let query = SignalQuery::default().entry(entry_id).key(key);
        let mut history = self.get_signals(user_id, &query)?;
        history.sort_by_key(|s| s.version);
        Ok(history)
    }

    /// Latest version of each partition matching `query`, unless that version
    /// has expired.
    ///
    /// Expiry is checked after collapsing, so an expired latest version hides
    /// the whole partition instead of exposing the version it superseded.
    /// Partitions come back in the order they first appear; `NewestFirst` sorts
    /// them by when their latest version was written, most recent first.
    /// `limit` applies to the collapsed result.
    pub fn current_signals(
        &self,
        user_id: &str,
        query: &SignalQuery,
    ) -> Result<Vec<Signal>, SignalError> {
        let now = stored_precision(query.active_at.unwrap_or_else(|| self.clock().now()));
        let scan = SignalQuery {
            order: QueryOrder::Insertion,
            limit: None,
            active_at: None,
            ..query.clone()
        };
        let rows = self.get_signals(user_id, &scan)?;

        // (insertion position of the chosen version, chosen version)
        let mut slots: HashMap<(String, String), usize> = HashMap::new();
        let mut latest: Vec<(usize, Signal)> = Vec::new();
        for (position, signal) in rows.into_iter().enumerate() {
            let slot_key = (signal.entry_id.clone(), signal.key.clone());
            match slots.get(&slot_key) {
                Some(&slot) => {
                    if signal.version > latest[slot].1.version {
                        latest[slot] = (position, signal);
                    }
                }
                None => {
                    slots.insert(slot_key, latest.len());
                    latest.push((position, signal));
                }
            }
        }

        latest.retain(|(_, signal)| !signal.is_expired_at(now));
        if query.order == QueryOrder::NewestFirst {
            latest.sort_by(|a, b| b.0.cmp(&a.0));
        }
        if let Some(limit) = query.limit {
            latest.truncate(limit);
        }
        Ok(latest.into_iter().map(|(_, signal)| signal).collect())
    }

    /// Everything one inference run produced for the user, in insertion order.
    pub fn signals_for_run(
        &self,
        user_id: &str,
        llm_run_id: &str,
    ) -> Result<Vec<Signal>, SignalError> {
        self.get_signals(user_id, &SignalQuery::default().run(llm_run_id))
    }
}
