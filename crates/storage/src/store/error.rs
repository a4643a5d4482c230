#![forbid(unsafe_code)]

use ao_core::TransitionError;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    InvalidInput(&'static str),
    InvalidPayload(String),
    UnknownId,
    SchemaMissing(&'static str),
    InvalidTransition(TransitionError),
    StateConflict {
        entity: &'static str,
        id: String,
        status: String,
        expected: &'static str,
    },
    AttemptsExhausted {
        attempt: i64,
        max_attempts: i64,
    },
    RevisionMismatch {
        expected: i64,
        actual: i64,
    },
    /// The writer did not answer in time. The write may still commit.
    WriteTimeout {
        timeout_ms: u64,
    },
    WriteAborted,
    WriterClosed,
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) | Self::Sql(_) => "STORE_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::UnknownId => "UNKNOWN_ID",
            Self::SchemaMissing(_) => "SCHEMA_MISSING",
            Self::InvalidTransition(_) | Self::StateConflict { .. } => "INVALID_STATE",
            Self::AttemptsExhausted { .. } => "MAX_ATTEMPTS",
            Self::RevisionMismatch { .. } => "REVISION_MISMATCH",
            Self::WriteTimeout { .. } => "WRITE_TIMEOUT",
            Self::WriteAborted => "WRITE_ABORTED",
            Self::WriterClosed => "WRITER_CLOSED",
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::InvalidPayload(message) => write!(f, "invalid payload: {message}"),
            Self::UnknownId => write!(f, "unknown id"),
            Self::SchemaMissing(table) => write!(f, "schema missing: {table}"),
            Self::InvalidTransition(err) => write!(f, "{err}"),
            Self::StateConflict {
                entity,
                id,
                status,
                expected,
            } => write!(
                f,
                "{entity} {id} is {status} (expected {expected})"
            ),
            Self::AttemptsExhausted {
                attempt,
                max_attempts,
            } => write!(
                f,
                "max attempts reached (attempt={attempt}, max_attempts={max_attempts})"
            ),
            Self::RevisionMismatch { expected, actual } => {
                write!(
                    f,
                    "revision mismatch (expected={expected}, actual={actual})"
                )
            }
            Self::WriteTimeout { timeout_ms } => write!(
                f,
                "write timed out after {timeout_ms}ms (outcome unknown)"
            ),
            Self::WriteAborted => write!(f, "write aborted before reporting an outcome"),
            Self::WriterClosed => write!(f, "writer is closed"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Sql(err) => Some(err),
            Self::InvalidTransition(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<TransitionError> for StoreError {
    fn from(value: TransitionError) -> Self {
        Self::InvalidTransition(value)
    }
}
