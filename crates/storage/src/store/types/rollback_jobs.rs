#![forbid(unsafe_code)]

use super::JobRow;
use ao_core::RollbackStatus;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
pub struct RollbackJobRow {
    pub id: String,
    pub job_id: String,
    pub proposal_id: String,
    pub resource_key: String,
    pub status: RollbackStatus,
    pub reason: Option<String>,
    pub started_at_ms: i64,
    pub ended_at_ms: Option<i64>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub evidence: Option<Value>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RollbackStartResult {
    Started { rollback: RollbackJobRow, job: JobRow },
    /// A rollback for the same job or resource is still running.
    AlreadyRunning(RollbackJobRow),
    /// An execution job currently owns the resource.
    ResourceBusy(JobRow),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RollbackFinishResult {
    pub rollback: RollbackJobRow,
    pub job: JobRow,
}
