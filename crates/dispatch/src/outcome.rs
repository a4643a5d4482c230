#![forbid(unsafe_code)]

use ao_core::{JobStatus, ProposalStatus};
use ao_storage::{JobRow, RollbackJobRow};
use serde::Serialize;
use std::fmt;

/// What an execute or retry call did. Contention is an outcome, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Succeeded,
    Failed,
    AlreadySucceeded,
    AlreadyFailed,
    AlreadyInProgress,
    AlreadyCancelled,
    AlreadyRolledBack,
    Unsupported,
    /// A handler write timed out and has not drained yet. The job stays
    /// `running`; a later execute or `settle_job` decides it.
    OutcomeUnknown,
}

impl ExecutionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Succeeded => "succeeded",
            ExecutionState::Failed => "failed",
            ExecutionState::AlreadySucceeded => "already_succeeded",
            ExecutionState::AlreadyFailed => "already_failed",
            ExecutionState::AlreadyInProgress => "already_in_progress",
            ExecutionState::AlreadyCancelled => "already_cancelled",
            ExecutionState::AlreadyRolledBack => "already_rolled_back",
            ExecutionState::Unsupported => "unsupported",
            ExecutionState::OutcomeUnknown => "outcome_unknown",
        }
    }

    /// The state reported for a job some earlier call created.
    pub fn for_existing(job: &JobRow) -> Self {
        if job.outcome_unknown() {
            return ExecutionState::OutcomeUnknown;
        }
        match job.status {
            JobStatus::Queued | JobStatus::Running => ExecutionState::AlreadyInProgress,
            JobStatus::Succeeded => ExecutionState::AlreadySucceeded,
            JobStatus::Failed => ExecutionState::AlreadyFailed,
            JobStatus::Cancelled => ExecutionState::AlreadyCancelled,
            JobStatus::RolledBack => ExecutionState::AlreadyRolledBack,
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionOutcome {
    pub state: ExecutionState,
    pub job: Option<JobRow>,
    /// Proposal status after the call, when the call observed it.
    pub proposal_status: Option<ProposalStatus>,
    pub reason_code: Option<String>,
    pub message: Option<String>,
}

impl ExecutionOutcome {
    pub(crate) fn existing(job: JobRow) -> Self {
        Self {
            state: ExecutionState::for_existing(&job),
            reason_code: job.last_error_code.clone(),
            message: job.last_error_message.clone(),
            job: Some(job),
            proposal_status: None,
        }
    }

    pub(crate) fn in_progress(job: Option<JobRow>, reason_code: &str, message: String) -> Self {
        Self {
            state: ExecutionState::AlreadyInProgress,
            job,
            proposal_status: None,
            reason_code: Some(reason_code.to_string()),
            message: Some(message),
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job.as_ref().map(|job| job.id.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackState {
    Succeeded,
    Failed,
    AlreadyInProgress,
}

impl RollbackState {
    pub fn as_str(self) -> &'static str {
        match self {
            RollbackState::Succeeded => "succeeded",
            RollbackState::Failed => "failed",
            RollbackState::AlreadyInProgress => "already_in_progress",
        }
    }
}

impl fmt::Display for RollbackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RollbackOutcome {
    pub state: RollbackState,
    /// The rollback job this call ran, or the one already running.
    pub rollback: Option<RollbackJobRow>,
    pub job: JobRow,
    pub reason_code: Option<String>,
    pub message: Option<String>,
}
