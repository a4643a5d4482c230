#![forbid(unsafe_code)]

use crate::config::DispatchConfig;
use crate::eligibility::auto_execute_policy;
use crate::engine::DispatchEngine;
use crate::error::DispatchError;
use crate::handlers::HandlerRegistry;
use crate::outcome::{ExecutionOutcome, RollbackOutcome};
use ao_core::{ExecutionMode, JobStatus, ProposalAction, ProposalScope, ProposalStatus};
use ao_storage::{
    AuditEventRow, AuditPageRequest, AutoExecuteDecision, JobRow, JobStatusCounts, ListJobsRequest,
    ListProposalsRequest, ProposalCreateRequest, ProposalRow, ProposalTransitionRequest,
    RollbackJobRow, SqliteStore,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// A raw submission as it arrives from the transport layer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateProposal {
    pub proposal_type: String,
    pub payload: Value,
    pub scope: Option<Value>,
    pub reason: String,
    pub evidence_refs: Vec<String>,
    pub requested_by: String,
    /// Defaults to `requested_by`.
    pub source: Option<String>,
    /// Caller's risk claim; recorded for audit, never trusted.
    pub risk_level: Option<String>,
}

#[derive(Debug)]
pub struct ApprovalOutcome {
    pub proposal: ProposalRow,
    pub eligible: bool,
    /// `None` when the proposal was not eligible. An error here does not undo
    /// the approval.
    pub auto_execution: Option<Result<ExecutionOutcome, DispatchError>>,
}

/// Review and execution entry points over one store.
#[derive(Debug)]
pub struct DispatchService {
    engine: DispatchEngine,
}

impl DispatchService {
    /// A service with the four reference handlers.
    pub fn new(store: Arc<SqliteStore>, config: DispatchConfig) -> Result<Self, DispatchError> {
        let registry = HandlerRegistry::with_reference_handlers(Arc::clone(&store));
        Self::with_registry(store, registry, config)
    }

    pub fn with_registry(
        store: Arc<SqliteStore>,
        registry: HandlerRegistry,
        config: DispatchConfig,
    ) -> Result<Self, DispatchError> {
        Ok(Self {
            engine: DispatchEngine::new(store, registry, config)?,
        })
    }

    pub fn engine(&self) -> &DispatchEngine {
        &self.engine
    }

    fn store(&self) -> &SqliteStore {
        self.engine.store()
    }

    pub fn create(&self, request: CreateProposal) -> Result<ProposalRow, DispatchError> {
        let action = ProposalAction::parse(&request.proposal_type, &request.payload)?;
        let scope = ProposalScope::parse(request.scope.as_ref())
            .map_err(DispatchError::InvalidPayload)?;
        let source = request
            .source
            .filter(|source| !source.trim().is_empty())
            .unwrap_or_else(|| request.requested_by.clone());
        Ok(self.store().proposal_create(ProposalCreateRequest {
            source,
            action,
            requested_risk: request.risk_level,
            scope,
            reason: request.reason,
            evidence_refs: request.evidence_refs,
            requested_by: request.requested_by,
        })?)
    }

    /// Approves and, when the policy allows, executes in the same call.
    pub fn approve(
        &self,
        proposal_id: &str,
        actor: &str,
        comment: Option<String>,
    ) -> Result<ApprovalOutcome, DispatchError> {
        let proposal = self.get_proposal(proposal_id)?;
        let (eligible, reason) = self.engine.auto_execute_eligible(&proposal);

        let mut request =
            ProposalTransitionRequest::new(&proposal.id, ProposalStatus::Approved, actor);
        request.comment = comment;
        request.expected_revision = Some(proposal.revision);
        request.auto_execute = Some(AutoExecuteDecision {
            eligible,
            policy: auto_execute_policy(reason, self.engine.config()),
            will_execute: eligible,
        });
        let approved = self.store().proposal_transition(request)?.proposal;
        info!(
            proposal_id = approved.id.as_str(),
            auto_execute = eligible,
            reason = reason.as_str(),
            "proposal approved"
        );
        if !eligible {
            return Ok(ApprovalOutcome {
                proposal: approved,
                eligible,
                auto_execution: None,
            });
        }

        let execution = self
            .engine
            .execute_proposal(&approved.id, ExecutionMode::Auto, actor);
        if let Err(err) = &execution {
            warn!(
                proposal_id = approved.id.as_str(),
                code = err.code(),
                "auto-execution failed after approval: {err}"
            );
        }
        let proposal = self.get_proposal(&approved.id).unwrap_or(approved);
        Ok(ApprovalOutcome {
            proposal,
            eligible,
            auto_execution: Some(execution),
        })
    }

    pub fn reject(
        &self,
        proposal_id: &str,
        actor: &str,
        comment: Option<String>,
    ) -> Result<ProposalRow, DispatchError> {
        self.close(proposal_id, ProposalStatus::Rejected, actor, comment)
    }

    /// `pending -> cancelled`, typically by the submitter.
    pub fn cancel_proposal(
        &self,
        proposal_id: &str,
        actor: &str,
        comment: Option<String>,
    ) -> Result<ProposalRow, DispatchError> {
        self.close(proposal_id, ProposalStatus::Cancelled, actor, comment)
    }

    fn close(
        &self,
        proposal_id: &str,
        to: ProposalStatus,
        actor: &str,
        comment: Option<String>,
    ) -> Result<ProposalRow, DispatchError> {
        let proposal = self.get_proposal(proposal_id)?;
        let mut request = ProposalTransitionRequest::new(&proposal.id, to, actor);
        request.comment = comment;
        request.expected_revision = Some(proposal.revision);
        let closed = self.store().proposal_transition(request)?.proposal;
        info!(proposal_id = closed.id.as_str(), status = to.as_str(), "proposal closed");
        Ok(closed)
    }

    pub fn execute(
        &self,
        proposal_id: &str,
        actor: &str,
    ) -> Result<ExecutionOutcome, DispatchError> {
        self.engine
            .execute_proposal(proposal_id, ExecutionMode::Manual, actor)
    }

    pub fn retry(&self, job_id: &str, actor: &str) -> Result<ExecutionOutcome, DispatchError> {
        self.engine.retry_job(job_id, actor)
    }

    pub fn settle(&self, job_id: &str, actor: &str) -> Result<ExecutionOutcome, DispatchError> {
        self.engine.settle_job(job_id, actor)
    }

    pub fn rollback(
        &self,
        job_id: &str,
        actor: &str,
        reason: Option<String>,
    ) -> Result<RollbackOutcome, DispatchError> {
        self.engine.rollback_job(job_id, actor, reason)
    }

    pub fn cancel(
        &self,
        job_id: &str,
        actor: &str,
        reason: Option<String>,
    ) -> Result<JobRow, DispatchError> {
        self.engine.cancel_job(job_id, actor, reason)
    }

    pub fn list_proposals(
        &self,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<ProposalRow>, DispatchError> {
        Ok(self.store().proposal_list(ListProposalsRequest {
            status,
            ..ListProposalsRequest::default()
        })?)
    }

    pub fn get_proposal(&self, proposal_id: &str) -> Result<ProposalRow, DispatchError> {
        self.store()
            .proposal_get(proposal_id)?
            .ok_or_else(|| DispatchError::not_found("proposal", proposal_id))
    }

    pub fn list_jobs(
        &self,
        status: Option<JobStatus>,
        proposal_id: Option<&str>,
    ) -> Result<Vec<JobRow>, DispatchError> {
        Ok(self.store().job_list(ListJobsRequest {
            status,
            proposal_id: proposal_id.map(str::to_string),
            ..ListJobsRequest::default()
        })?)
    }

    pub fn get_job(&self, job_id: &str) -> Result<JobRow, DispatchError> {
        self.store()
            .job_get(job_id)?
            .ok_or_else(|| DispatchError::not_found("job", job_id))
    }

    pub fn get_rollback_job(&self, rollback_job_id: &str) -> Result<RollbackJobRow, DispatchError> {
        self.store()
            .rollback_get(rollback_job_id)?
            .ok_or_else(|| DispatchError::not_found("rollback job", rollback_job_id))
    }

    pub fn list_rollback_jobs(&self, job_id: &str) -> Result<Vec<RollbackJobRow>, DispatchError> {
        Ok(self.store().rollback_list_for_job(job_id)?)
    }

    /// Newest first.
    pub fn audit_for_proposal(
        &self,
        proposal_id: &str,
    ) -> Result<Vec<AuditEventRow>, DispatchError> {
        self.get_proposal(proposal_id)?;
        Ok(self.store().audit_for_proposal(proposal_id, 0)?)
    }

    /// One page of the trail, newest first. Feed the last row's `seq` back as
    /// `before_seq` for the next page; an empty page ends the trail.
    pub fn audit_page(
        &self,
        proposal_id: &str,
        before_seq: Option<i64>,
        limit: usize,
    ) -> Result<Vec<AuditEventRow>, DispatchError> {
        self.get_proposal(proposal_id)?;
        Ok(self.store().audit_page(AuditPageRequest {
            proposal_id: proposal_id.to_string(),
            before_seq,
            limit,
        })?)
    }

    pub fn job_status_counts(&self) -> Result<JobStatusCounts, DispatchError> {
        Ok(self.store().job_status_counts()?)
    }
}
