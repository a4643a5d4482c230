#![forbid(unsafe_code)]

use super::RollbackJobRow;
use ao_core::{ExecutionMode, JobStatus, ProposalStatus};
use serde_json::Value;

/// `last_error_code` of a running job whose handler write timed out and
/// could not be settled yet.
pub const JOB_OUTCOME_UNKNOWN: &str = "OUTCOME_UNKNOWN";

#[derive(Clone, Debug, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub proposal_id: String,
    pub status: JobStatus,
    pub idempotency_key: String,
    pub resource_key: String,
    pub execution_mode: ExecutionMode,
    pub attempt: i64,
    pub max_attempts: i64,
    pub started_at_ms: Option<i64>,
    pub ended_at_ms: Option<i64>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub evidence: Option<Value>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl JobRow {
    /// Running, but nobody is applying it any more: its handler returned
    /// without knowing whether the write landed.
    pub fn outcome_unknown(&self) -> bool {
        self.status == JobStatus::Running
            && self.last_error_code.as_deref() == Some(JOB_OUTCOME_UNKNOWN)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum JobCreateResult {
    Created(JobRow),
    /// A job with the same idempotency key already exists.
    Existing(JobRow),
    /// Another queued/running job owns the resource.
    ResourceBusy(JobRow),
    RollbackInProgress(RollbackJobRow),
}

#[derive(Clone, Debug, PartialEq)]
pub enum JobStartResult {
    Started(JobRow),
    ResourceBusy(JobRow),
    RollbackInProgress(RollbackJobRow),
}

#[derive(Clone, Debug, PartialEq)]
pub struct JobFinishResult {
    pub job: JobRow,
    pub proposal_status: ProposalStatus,
    /// False when the proposal was already terminal and kept its status.
    pub proposal_transitioned: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobStatusCounts {
    pub queued: u64,
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub rolled_back: u64,
}

impl JobStatusCounts {
    pub(in crate::store) fn add(&mut self, status: JobStatus, count: u64) {
        let slot = match status {
            JobStatus::Queued => &mut self.queued,
            JobStatus::Running => &mut self.running,
            JobStatus::Succeeded => &mut self.succeeded,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Cancelled => &mut self.cancelled,
            JobStatus::RolledBack => &mut self.rolled_back,
        };
        *slot += count;
    }

    pub fn total(&self) -> u64 {
        self.queued + self.running + self.succeeded + self.failed + self.cancelled + self.rolled_back
    }
}
