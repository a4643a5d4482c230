#![forbid(unsafe_code)]

use rusqlite::ErrorCode;

/// Which uniqueness rule rejected a write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(in crate::store) enum ConstraintKind {
    IdempotencyKey,
    ResourceKey,
    RollbackJob,
    Other,
}

pub(in crate::store) fn classify_constraint_violation(err: &rusqlite::Error) -> Option<ConstraintKind> {
    let rusqlite::Error::SqliteFailure(code, message) = err else {
        return None;
    };
    let message = message.as_deref().unwrap_or_default();
    let is_unique = code.code == ErrorCode::ConstraintViolation
        || message.contains("UNIQUE constraint failed")
        || message.contains("PRIMARY KEY constraint failed");
    if !is_unique {
        return None;
    }

    // SQLite names the offending columns: "UNIQUE constraint failed: jobs.resource_key".
    let kind = if message.contains("jobs.idempotency_key") {
        ConstraintKind::IdempotencyKey
    } else if message.contains("jobs.resource_key") {
        ConstraintKind::ResourceKey
    } else if message.contains("rollback_jobs.") {
        ConstraintKind::RollbackJob
    } else {
        ConstraintKind::Other
    };
    Some(kind)
}
