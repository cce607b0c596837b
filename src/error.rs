//! Error kinds for the ingestion engine.
//!
//! One variant per error kind enumerated in the error handling design:
//! the partition loop matches on these to decide whether a failure is
//! retryable (goes to a retry topic, then the DLT once attempts are
//! exhausted), triggers the circuit breaker's fallback path, or is
//! permanent and routes straight to the dead-letter handler.

use thiserror::Error;

/// Errors observable by the consumer runtime while processing one record.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("validation failure: {0}")]
    ValidationFailure(String),

    #[error("transient store failure: {0}")]
    TransientStoreFailure(String),

    #[error("transient publish failure: {0}")]
    TransientPublishFailure(String),

    #[error("transient collaborator failure ({collaborator}): {reason}")]
    TransientCollaboratorFailure {
        collaborator: &'static str,
        reason: String,
    },

    #[error("handler deadline exceeded after {elapsed_ms}ms")]
    DeadlineExceeded { elapsed_ms: u64 },

    #[error("circuit open for family {family}")]
    CircuitOpen { family: String },

    #[error("permanent failure after {attempts} attempts: {reason}")]
    PermanentFailure { attempts: u32, reason: String },
}

impl IngestError {
    /// Whether the partition loop should retry this record (in-process,
    /// then via a retry topic) rather than routing straight to the DLT.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::TransientStoreFailure(_)
                | IngestError::TransientPublishFailure(_)
                | IngestError::TransientCollaboratorFailure { .. }
                | IngestError::DeadlineExceeded { .. }
        )
    }

    /// Whether this error should be routed to the DLT without consuming a
    /// retry attempt (parse/validation failures are never transient).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IngestError::MalformedEvent(_)
                | IngestError::ValidationFailure(_)
                | IngestError::PermanentFailure { .. }
        )
    }

    /// A short machine-readable reason code, used on DLT audit rows.
    pub fn reason_code(&self) -> &'static str {
        match self {
            IngestError::MalformedEvent(_) => "INVALID_FORMAT",
            IngestError::ValidationFailure(_) => "VALIDATION_FAILURE",
            IngestError::TransientStoreFailure(_) => "TRANSIENT_STORE_FAILURE",
            IngestError::TransientPublishFailure(_) => "TRANSIENT_PUBLISH_FAILURE",
            IngestError::TransientCollaboratorFailure { .. } => "TRANSIENT_COLLABORATOR_FAILURE",
            IngestError::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            IngestError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            IngestError::PermanentFailure { .. } => "PERMANENT_FAILURE",
        }
    }
}
