#![forbid(unsafe_code)]

use ao_core::{PayloadError, TransitionError};
use ao_storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{0}")]
    InvalidPayload(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("schema missing: {0}")]
    SchemaMissing(String),
    #[error("max attempts reached (attempt={attempt}, max_attempts={max_attempts})")]
    MaxAttempts { attempt: i64, max_attempts: i64 },
    #[error("proposal type {0} has no execution handler")]
    UnsupportedType(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Store(StoreError),
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::PreconditionFailed(_) => "PRECONDITION_FAILED",
            Self::SchemaMissing(_) => "SCHEMA_MISSING",
            Self::MaxAttempts { .. } => "MAX_ATTEMPTS",
            Self::UnsupportedType(_) => "UNSUPPORTED_TYPE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Store(err) => err.code(),
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        Self::NotFound {
            entity,
            id: id.trim().to_string(),
        }
    }
}

impl From<StoreError> for DispatchError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::InvalidInput(message) => Self::InvalidPayload(message.to_string()),
            StoreError::InvalidPayload(message) => Self::InvalidPayload(message),
            StoreError::InvalidTransition(err) => Self::InvalidState(err.to_string()),
            err @ StoreError::StateConflict { .. } => Self::InvalidState(err.to_string()),
            StoreError::AttemptsExhausted {
                attempt,
                max_attempts,
            } => Self::MaxAttempts {
                attempt,
                max_attempts,
            },
            StoreError::SchemaMissing(table) => Self::SchemaMissing(table.to_string()),
            err @ StoreError::RevisionMismatch { .. } => {
                Self::PreconditionFailed(err.to_string())
            }
            other => Self::Store(other),
        }
    }
}

impl From<PayloadError> for DispatchError {
    fn from(value: PayloadError) -> Self {
        Self::InvalidPayload(value.to_string())
    }
}

impl From<TransitionError> for DispatchError {
    fn from(value: TransitionError) -> Self {
        Self::InvalidState(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_keep_their_taxonomy() {
        let err = DispatchError::from(StoreError::AttemptsExhausted {
            attempt: 3,
            max_attempts: 3,
        });
        assert_eq!(err.code(), "MAX_ATTEMPTS");

        let err = DispatchError::from(StoreError::SchemaMissing("fleet_tasks"));
        assert_eq!(err.code(), "SCHEMA_MISSING");
        assert_eq!(err.to_string(), "schema missing: fleet_tasks");

        let err = DispatchError::from(StoreError::WriteTimeout { timeout_ms: 10 });
        assert_eq!(err.code(), "WRITE_TIMEOUT");

        let err = DispatchError::from(StoreError::InvalidInput("actor must not be empty"));
        assert_eq!(err.code(), "INVALID_PAYLOAD");
    }
}
