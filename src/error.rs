//! Error types for signal ingestion and retrieval
//!
//! Errors are classified by where they stop the caller:
//! - Validation: malformed input, rejected before the store is touched
//! - Store write / version conflict: the store refused or failed an insert
//! - Store read: max-version lookup or query failed
//! - Partial batch: a best-effort batch stopped after committing some rows

use thiserror::Error;

/// Error types for the signal versioning core
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Invalid signal input: {0}")]
    Validation(String),

    #[error("Signal store write failed: {0}")]
    StoreWrite(String),

    #[error("Version {version} already exists for partition {partition}")]
    VersionConflict { partition: String, version: u32 },

    #[error("Signal store read failed: {0}")]
    StoreRead(String),

    #[error(
        "Batch stopped at observation {failed_index} after committing {} signal(s): {source}",
        .committed.len()
    )]
    PartialBatch {
        committed: Vec<String>,
        failed_index: usize,
        #[source]
        source: Box<SignalError>,
    },
}

impl SignalError {
    /// Returns true if the failed write may succeed when the caller tries again.
    ///
    /// Version conflicts and busy/locked stores are transient. Validation errors
    /// and reads that failed for structural reasons are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            SignalError::VersionConflict { .. } => true,
            SignalError::StoreWrite(msg) | SignalError::StoreRead(msg) => {
                let lower = msg.to_ascii_lowercase();
                lower.contains("busy") || lower.contains("locked")
            }
            SignalError::PartialBatch { source, .. } => source.is_retryable(),
            SignalError::Validation(_) => false,
        }
    }

    /// Returns true for failures raised by the store while writing.
    pub fn is_store_write(&self) -> bool {
        match self {
            SignalError::StoreWrite(_) | SignalError::VersionConflict { .. } => true,
            SignalError::PartialBatch { source, .. } => source.is_store_write(),
            _ => false,
        }
    }

    /// Ids of signals that were durably written before this error was raised.
    pub fn committed_ids(&self) -> &[String] {
        match self {
            SignalError::PartialBatch { committed, .. } => committed,
            _ => &[],
        }
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            SignalError::Validation(_) => "Fix the observation fields and submit again.",
            SignalError::StoreWrite(_) => {
                "Check that the signal database is writable and has space."
            }
            SignalError::VersionConflict { .. } => {
                "Another writer recorded this key at the same time. Try again."
            }
            SignalError::StoreRead(_) => "Check that the signal database exists and is readable.",
            SignalError::PartialBatch { .. } => {
                "Resubmit only the observations that were not recorded."
            }
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        SignalError::Validation(msg.into())
    }
}

/// Serializable error representation for callers that surface ingestion
/// failures to the end user.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestErrorReport {
    pub message: String,
    pub user_message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
    pub committed_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorType {
    Validation,
    StoreWrite,
    StoreRead,
    PartialBatch,
}

impl From<&SignalError> for IngestErrorReport {
    fn from(err: &SignalError) -> Self {
        let error_type = match err {
            SignalError::Validation(_) => ErrorType::Validation,
            SignalError::StoreWrite(_) | SignalError::VersionConflict { .. } => {
                ErrorType::StoreWrite
            }
            SignalError::StoreRead(_) => ErrorType::StoreRead,
            SignalError::PartialBatch { .. } => ErrorType::PartialBatch,
        };
        let user_message = if error_type == ErrorType::PartialBatch {
            "Some observations were not recorded."
        } else {
            "Observation not recorded."
        };

        IngestErrorReport {
            message: err.to_string(),
            user_message: user_message.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
            committed_ids: err.committed_ids().to_vec(),
        }
    }
}
