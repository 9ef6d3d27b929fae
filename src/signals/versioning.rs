//! Signal versioning engine.
//!
//! Every write reads the partition's current max version and appends
//! `max + 1` inside one `SignalStore::atomically` scope, so two writers on
//! the same (user, entry, key) can never both claim the same version.

use super::clock::{Clock, IdGenerator, SystemClock, UuidIds};
use super::record::{Observation, Provenance, Signal, ValidationPolicy};
use super::store::SignalStore;
use crate::error::SignalError;

/// Engine-level switch for how a batch treats a mid-batch failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchMode {
    /// Each observation commits on its own; a failure keeps earlier rows.
    #[default]
    BestEffort,
    /// The whole batch commits or none of it does.
    Atomic,
}

pub struct SignalEngine<S, I = UuidIds, C = SystemClock> {
    store: S,
    ids: I,
    clock: C,
    pub(crate) policy: ValidationPolicy,
    pub(crate) batch_mode: BatchMode,
}

impl<S: SignalStore> SignalEngine<S> {
    pub fn new(store: S) -> Self {
        Self::with_capabilities(store, UuidIds, SystemClock)
    }
}

impl<S, I, C> SignalEngine<S, I, C>
where
    S: SignalStore,
    I: IdGenerator,
    C: Clock,
{
    pub fn with_capabilities(store: S, ids: I, clock: C) -> Self {
        Self {
            store,
            ids,
            clock,
            policy: ValidationPolicy::default(),
            batch_mode: BatchMode::default(),
        }
    }

    pub fn with_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_batch_mode(mut self, mode: BatchMode) -> Self {
        self.batch_mode = mode;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Record one observation as the next version of its partition.
    /// Returns the new signal's id.
    #[allow(clippy::too_many_arguments)]
    pub fn add_signal(
        &self,
        user_id: &str,
        entry_id: &str,
        key: &str,
        value: f64,
        confidence: f64,
        model: &str,
        trigger_capture_id: Option<&str>,
        source_window_days: Option<u32>,
        llm_run_id: Option<&str>,
    ) -> Result<String, SignalError> {
        let observation = Observation::new(entry_id, key, value, confidence);
        let provenance = Provenance::new(trigger_capture_id, source_window_days, llm_run_id);
        self.add_observation(user_id, &observation, model, &provenance)
    }

    /// Structured form of `add_signal`.
    pub fn add_observation(
        &self,
        user_id: &str,
        observation: &Observation,
        model: &str,
        provenance: &Provenance,
    ) -> Result<String, SignalError> {
        self.policy.validate_user(user_id)?;
        self.policy.validate_model(model)?;
        self.policy.validate_observation(observation)?;

        let signal = self.store.atomically(|store| {
            self.write_next_version(store, user_id, observation, model, provenance)
        })?;
        Ok(signal.id)
    }

    /// Allocate and persist the next version. Callers must already hold the
    /// store's atomic scope.
    pub(crate) fn write_next_version(
        &self,
        store: &S,
        user_id: &str,
        observation: &Observation,
        model: &str,
        provenance: &Provenance,
    ) -> Result<Signal, SignalError> {
        let max_version =
            store.get_max_version(user_id, &observation.entry_id, &observation.key)?;
        let version = max_version.checked_add(1).ok_or_else(|| {
            SignalError::StoreWrite(format!(
                "version space exhausted for {}/{}/{}",
                user_id, observation.entry_id, observation.key
            ))
        })?;

        let signal = Signal {
            id: self.ids.next_id(),
            user_id: user_id.to_string(),
            entry_id: observation.entry_id.clone(),
            key: observation.key.clone(),
            value: observation.value,
            confidence: observation.confidence,
            model: model.to_string(),
            version,
            generated_at: self.clock.now(),
            expires_at: None,
            trigger_capture_id: provenance.trigger_capture_id.clone(),
            source_window_days: provenance.source_window_days,
            llm_run_id: provenance.llm_run_id.clone(),
        };
        store.create(&signal)?;

        log::debug!(
            "Recorded signal {} for {} at version {}",
            signal.id,
            signal.partition(),
            signal.version
        );
        Ok(signal)
    }
}
