//! Signal record model: the immutable versioned fact, the observation tuple a
//! caller submits, and the provenance shared across one ingestion.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SignalError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A stored signal. Never updated once written; superseding a fact means
/// writing the next version of its partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: String,
    pub user_id: String,
    pub entry_id: String,
    pub key: String,
    pub value: f64,
    pub confidence: f64,
    pub model: String,
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub trigger_capture_id: Option<String>,
    pub source_window_days: Option<u32>,
    pub llm_run_id: Option<String>,
}

impl Signal {
    pub fn partition(&self) -> Partition<'_> {
        Partition {
            user_id: &self.user_id,
            entry_id: &self.entry_id,
            key: &self.key,
        }
    }

    /// True when the signal carries an expiry at or before `at`.
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= at)
    }
}

/// The (user, entry, key) triple that scopes version ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Partition<'a> {
    pub user_id: &'a str,
    pub entry_id: &'a str,
    pub key: &'a str,
}

impl fmt::Display for Partition<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.entry_id, self.key)
    }
}

/// One observed value submitted for versioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub entry_id: String,
    pub key: String,
    pub value: f64,
    pub confidence: f64,
}

impl Observation {
    pub fn new(
        entry_id: impl Into<String>,
        key: impl Into<String>,
        value: f64,
        confidence: f64,
    ) -> Self {
        Self {
            entry_id: entry_id.into(),
            key: key.into(),
            value,
            confidence,
        }
    }
}

/// Where a set of signals came from. Every field is optional; absence means
/// "not known", not zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    #[serde(default)]
    pub trigger_capture_id: Option<String>,
    #[serde(default)]
    pub source_window_days: Option<u32>,
    #[serde(default)]
    pub llm_run_id: Option<String>,
}

impl Provenance {
    pub fn new(
        trigger_capture_id: Option<&str>,
        source_window_days: Option<u32>,
        llm_run_id: Option<&str>,
    ) -> Self {
        Self {
            trigger_capture_id: trigger_capture_id.map(str::to_string),
            source_window_days,
            llm_run_id: llm_run_id.map(str::to_string),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Boundary checks applied before any store access.
///
/// `confidence_range` is inclusive on both ends. Without it, confidence only
/// has to be a finite number.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ValidationPolicy {
    pub confidence_range: Option<(f64, f64)>,
}

impl ValidationPolicy {
    pub fn validate_user(&self, user_id: &str) -> Result<(), SignalError> {
        require_identifier("userId", user_id)
    }

    pub fn validate_model(&self, model: &str) -> Result<(), SignalError> {
        require_identifier("model", model)
    }

    pub fn validate_observation(&self, observation: &Observation) -> Result<(), SignalError> {
        require_identifier("entryId", &observation.entry_id)?;
        require_identifier("key", &observation.key)?;
        require_finite("value", observation.value)?;
        require_finite("confidence", observation.confidence)?;

        if let Some((min, max)) = self.confidence_range {
            if observation.confidence < min || observation.confidence > max {
                return Err(SignalError::validation(format!(
                    "confidence {} is outside [{}, {}] for key '{}'",
                    observation.confidence, min, max, observation.key
                )));
            }
        }
        Ok(())
    }
}

fn require_identifier(field: &str, value: &str) -> Result<(), SignalError> {
    if value.trim().is_empty() {
        return Err(SignalError::validation(format!("{field} is required")));
    }
    Ok(())
}

fn require_finite(field: &str, value: f64) -> Result<(), SignalError> {
    if !value.is_finite() {
        return Err(SignalError::validation(format!(
            "{field} must be a finite number, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_signal() -> Signal {
        Signal {
            id: "sig-1".to_string(),
            user_id: "u1".to_string(),
            entry_id: "e1".to_string(),
            key: "mood".to_string(),
            value: 0.8,
            confidence: 0.9,
            model: "m1".to_string(),
            version: 1,
            generated_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            expires_at: None,
            trigger_capture_id: None,
            source_window_days: Some(7),
            llm_run_id: None,
        }
    }

    #[test]
    fn test_partition_display() {
        let signal = sample_signal();
        assert_eq!(signal.partition().to_string(), "u1/e1/mood");
    }

    #[test]
    fn test_expiry_check() {
        let mut signal = sample_signal();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        assert!(!signal.is_expired_at(now), "no expiry means never stale");

        signal.expires_at = Some(now);
        assert!(signal.is_expired_at(now));
        assert!(!signal.is_expired_at(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_signal_serializes_camel_case_with_nulls() {
        let json = serde_json::to_value(sample_signal()).expect("serialize");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["sourceWindowDays"], 7);
        assert!(json["llmRunId"].is_null());
        assert!(json["expiresAt"].is_null());
    }

    #[test]
    fn test_validation_rejects_blank_identifiers() {
        let policy = ValidationPolicy::default();
        assert!(policy.validate_user("  ").is_err());
        assert!(policy.validate_model("").is_err());
        assert!(policy
            .validate_observation(&Observation::new("", "mood", 0.1, 0.5))
            .is_err());
        assert!(policy
            .validate_observation(&Observation::new("e1", "", 0.1, 0.5))
            .is_err());
    }

    #[test]
    fn test_validation_rejects_non_finite_numbers() {
        let policy = ValidationPolicy::default();
        let err = policy
            .validate_observation(&Observation::new("e1", "mood", f64::NAN, 0.5))
            .unwrap_err();
        assert!(matches!(err, SignalError::Validation(_)));
        assert!(policy
            .validate_observation(&Observation::new("e1", "mood", 0.1, f64::INFINITY))
            .is_err());
    }

    #[test]
    fn test_confidence_range_is_optional() {
        let open = ValidationPolicy::default();
        assert!(open
            .validate_observation(&Observation::new("e1", "mood", 0.1, 42.0))
            .is_ok());

        let unit = ValidationPolicy {
            confidence_range: Some((0.0, 1.0)),
        };
        assert!(unit
            .validate_observation(&Observation::new("e1", "mood", 0.1, 1.0))
            .is_ok());
        assert!(unit
            .validate_observation(&Observation::new("e1", "mood", 0.1, 1.01))
            .is_err());
    }
}
