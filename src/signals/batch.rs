//! Batch ingestion: many observations under one provenance context.
//!
//! In `BatchMode::BestEffort` each observation is its own atomic write. A
//! failure after the first commit surfaces as `SignalError::PartialBatch`
//! carrying the ids that did commit. `BatchMode::Atomic` wraps the whole
//! batch in a single store scope instead.

use super::clock::{Clock, IdGenerator};
use super::record::{Observation, Provenance};
use super::store::SignalStore;
use super::versioning::{BatchMode, SignalEngine};
use crate::error::SignalError;

impl<S, I, C> SignalEngine<S, I, C>
where
    S: SignalStore,
    I: IdGenerator,
    C: Clock,
{
    /// Record every observation in input order. The returned ids line up with
    /// `observations` index for index.
    pub fn add_signals_batch(
        &self,
        user_id: &str,
        observations: &[Observation],
        model: &str,
        provenance: &Provenance,
    ) -> Result<Vec<String>, SignalError> {
        if observations.is_empty() {
            return Err(SignalError::validation("batch contains no observations"));
        }
        self.policy.validate_user(user_id)?;
        self.policy.validate_model(model)?;
        for (index, observation) in observations.iter().enumerate() {
            self.policy
                .validate_observation(observation)
                .map_err(|e| match e {
                    SignalError::Validation(msg) => {
                        SignalError::validation(format!("observation {index}: {msg}"))
                    }
                    other => other,
                })?;
        }

        let ids = match self.batch_mode {
            BatchMode::BestEffort => self.write_each(user_id, observations, model, provenance)?,
            BatchMode::Atomic => self.store().atomically(|store| {
                observations
                    .iter()
                    .map(|obs| {
                        self.write_next_version(store, user_id, obs, model, provenance)
                            .map(|signal| signal.id)
                    })
                    .collect::<Result<Vec<_>, _>>()
            })?,
        };

        log::info!(
            "Recorded {} signal(s) for user {} (model {}, run {})",
            ids.len(),
            user_id,
            model,
            provenance.llm_run_id.as_deref().unwrap_or("-")
        );
        Ok(ids)
    }

    fn write_each(
        &self,
        user_id: &str,
        observations: &[Observation],
        model: &str,
        provenance: &Provenance,
    ) -> Result<Vec<String>, SignalError> {
        let mut committed = Vec::with_capacity(observations.len());
        for (index, observation) in observations.iter().enumerate() {
            let written = self.store().atomically(|store| {
                self.write_next_version(store, user_id, observation, model, provenance)
            });
            match written {
                Ok(signal) => committed.push(signal.id),
                Err(e) if committed.is_empty() => return Err(e),
                Err(e) => {
                    log::warn!(
                        "Batch for user {} stopped at observation {} of {}: {}",
                        user_id,
                        index,
                        observations.len(),
                        e
                    );
                    return Err(SignalError::PartialBatch {
                        committed,
                        failed_index: index,
                        source: Box::new(e),
                    });
                }
            }
        }
        Ok(committed)
    }
}
