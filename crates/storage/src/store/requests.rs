#![forbid(unsafe_code)]

use ao_core::{ExecutionMode, JobStatus, ProposalAction, ProposalScope, ProposalStatus};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
pub struct ProposalCreateRequest {
    pub source: String,
    pub action: ProposalAction,
    /// Risk claimed by the submitter, as sent. Recorded in the ledger, never
    /// stored as the risk level; it need not even be a known level.
    pub requested_risk: Option<String>,
    pub scope: ProposalScope,
    pub reason: String,
    pub evidence_refs: Vec<String>,
    pub requested_by: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AutoExecuteDecision {
    pub eligible: bool,
    pub policy: Value,
    pub will_execute: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProposalTransitionRequest {
    pub proposal_id: String,
    pub to: ProposalStatus,
    pub actor: String,
    pub comment: Option<String>,
    pub reason: Option<String>,
    pub expected_revision: Option<i64>,
    pub auto_execute: Option<AutoExecuteDecision>,
}

impl ProposalTransitionRequest {
    pub fn new(proposal_id: impl Into<String>, to: ProposalStatus, actor: impl Into<String>) -> Self {
        Self {
            proposal_id: proposal_id.into(),
            to,
            actor: actor.into(),
            comment: None,
            reason: None,
            expected_revision: None,
            auto_execute: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListProposalsRequest {
    pub status: Option<ProposalStatus>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditPageRequest {
    pub proposal_id: String,
    pub before_seq: Option<i64>,
    /// `0` means no limit.
    pub limit: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobCreateRequest {
    pub proposal_id: String,
    pub idempotency_key: String,
    pub resource_key: String,
    pub execution_mode: ExecutionMode,
    pub max_attempts: i64,
    pub actor: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct JobFinishRequest {
    pub job_id: String,
    pub actor: String,
    pub success: bool,
    pub evidence: Value,
    pub reason_code: Option<String>,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListJobsRequest {
    pub status: Option<JobStatus>,
    pub proposal_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RollbackCreateRequest {
    pub job_id: String,
    pub actor: String,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RollbackFinishRequest {
    pub rollback_job_id: String,
    pub actor: String,
    pub success: bool,
    pub evidence: Value,
    pub reason_code: Option<String>,
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FleetReassignRequest {
    pub task_id: String,
    /// When set, the current owner must match or nothing is written.
    pub expected_owner: Option<String>,
    pub new_owner: Option<String>,
    pub route_plan: Option<Value>,
}
