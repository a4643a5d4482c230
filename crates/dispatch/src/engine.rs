#![forbid(unsafe_code)]

use crate::config::DispatchConfig;
use crate::eligibility::{EligibilityReason, auto_execute_eligible};
use crate::error::DispatchError;
use crate::handlers::{
    ActionHandler, ApplyOutcome, HandlerRegistry, REASON_HANDLER_PANIC, RevertOutcome,
};
use crate::keys::{compute_idempotency_key, compute_resource_key};
use crate::outcome::{ExecutionOutcome, ExecutionState, RollbackOutcome, RollbackState};
use ao_core::{ExecutionMode, JobStatus, ProposalStatus};
use ao_storage::{
    JobCreateRequest, JobCreateResult, JobFinishRequest, JobRow, JobStartResult, ProposalRow,
    RollbackCreateRequest, RollbackFinishRequest, RollbackStartResult, SqliteStore, StoreError,
};
use serde_json::{Value, json};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{info, warn};

const REASON_RESOURCE_BUSY: &str = "RESOURCE_BUSY";
const REASON_ROLLBACK_IN_PROGRESS: &str = "ROLLBACK_IN_PROGRESS";
const REASON_UNSUPPORTED_TYPE: &str = "UNSUPPORTED_TYPE";

/// Turns approved proposals into jobs and runs them through their handlers.
///
/// The engine holds no locks of its own: duplicate and conflicting work is
/// refused by the store's unique indexes and reported as outcomes.
pub struct DispatchEngine {
    store: Arc<SqliteStore>,
    registry: HandlerRegistry,
    config: DispatchConfig,
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("storage_dir", &self.store.storage_dir())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

impl DispatchEngine {
    pub fn new(
        store: Arc<SqliteStore>,
        registry: HandlerRegistry,
        config: DispatchConfig,
    ) -> Result<Self, DispatchError> {
        config.validate(&registry)?;
        Ok(Self {
            store,
            registry,
            config,
        })
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn auto_execute_eligible(&self, proposal: &ProposalRow) -> (bool, EligibilityReason) {
        auto_execute_eligible(proposal, &self.config, &self.registry)
    }

    pub fn execute_proposal(
        &self,
        proposal_id: &str,
        mode: ExecutionMode,
        actor: &str,
    ) -> Result<ExecutionOutcome, DispatchError> {
        let proposal = self.load_proposal(proposal_id)?;
        let Some(handler) = self.registry.get(&proposal.proposal_type()) else {
            info!(
                proposal_id = proposal.id.as_str(),
                proposal_type = proposal.proposal_type().as_str(),
                "execution skipped: unsupported type"
            );
            return Ok(ExecutionOutcome {
                state: ExecutionState::Unsupported,
                job: None,
                proposal_status: Some(proposal.status),
                reason_code: Some(REASON_UNSUPPORTED_TYPE.to_string()),
                message: Some(format!(
                    "proposal type {} has no execution handler",
                    proposal.proposal_type()
                )),
            });
        };

        match proposal.status {
            ProposalStatus::Approved => {}
            ProposalStatus::Executed | ProposalStatus::Failed => {
                let job = self.store.job_latest_for_proposal(&proposal.id)?;
                let state = if proposal.status == ProposalStatus::Executed {
                    ExecutionState::AlreadySucceeded
                } else {
                    ExecutionState::AlreadyFailed
                };
                return Ok(ExecutionOutcome {
                    state,
                    reason_code: job.as_ref().and_then(|job| job.last_error_code.clone()),
                    message: job.as_ref().and_then(|job| job.last_error_message.clone()),
                    job,
                    proposal_status: Some(proposal.status),
                });
            }
            status => {
                return Err(DispatchError::InvalidState(format!(
                    "proposal {} is {status}; only approved proposals can be executed",
                    proposal.id
                )));
            }
        }

        let idempotency_key = compute_idempotency_key(&proposal);
        if let Some(job) = self.store.job_by_idempotency_key(&idempotency_key)? {
            return self.resume(handler.as_ref(), &proposal, job, actor);
        }

        let request = JobCreateRequest {
            proposal_id: proposal.id.clone(),
            idempotency_key: idempotency_key.clone(),
            resource_key: compute_resource_key(&proposal),
            execution_mode: mode,
            max_attempts: self.config.max_attempts,
            actor: actor.to_string(),
        };
        let created = match self.store.job_create(request.clone()) {
            Ok(created) => created,
            Err(err @ StoreError::WriteTimeout { .. }) => {
                warn!(
                    proposal_id = proposal.id.as_str(),
                    "job create timed out; waiting for the writer to drain"
                );
                self.create_after_timeout(&idempotency_key, request, err)?
            }
            Err(err) => return Err(err.into()),
        };

        match created {
            JobCreateResult::Created(job) => self.run(handler.as_ref(), &proposal, job, actor),
            JobCreateResult::Existing(job) => self.resume(handler.as_ref(), &proposal, job, actor),
            JobCreateResult::ResourceBusy(active) => {
                warn!(
                    proposal_id = proposal.id.as_str(),
                    active_job_id = active.id.as_str(),
                    resource_key = active.resource_key.as_str(),
                    "resource busy"
                );
                let message = format!(
                    "resource {} is owned by active job {}",
                    active.resource_key, active.id
                );
                Ok(ExecutionOutcome::in_progress(
                    Some(active),
                    REASON_RESOURCE_BUSY,
                    message,
                ))
            }
            JobCreateResult::RollbackInProgress(rollback) => {
                warn!(
                    proposal_id = proposal.id.as_str(),
                    rollback_job_id = rollback.id.as_str(),
                    "resource held by a running rollback"
                );
                Ok(ExecutionOutcome::in_progress(
                    None,
                    REASON_ROLLBACK_IN_PROGRESS,
                    format!(
                        "resource {} is being rolled back by {}",
                        rollback.resource_key, rollback.id
                    ),
                ))
            }
        }
    }

    /// Re-runs a failed job under the same id and keys.
    pub fn retry_job(&self, job_id: &str, actor: &str) -> Result<ExecutionOutcome, DispatchError> {
        let job = self.load_job(job_id)?;
        if job.status != JobStatus::Failed {
            return Err(DispatchError::InvalidState(format!(
                "job {} is {}; only failed jobs can be retried",
                job.id, job.status
            )));
        }
        if job.attempt >= job.max_attempts {
            return Err(DispatchError::MaxAttempts {
                attempt: job.attempt,
                max_attempts: job.max_attempts,
            });
        }
        let proposal = self.load_proposal(&job.proposal_id)?;
        let handler = self.handler_for(&proposal)?;
        info!(
            job_id = job.id.as_str(),
            attempt = job.attempt,
            max_attempts = job.max_attempts,
            "retrying job"
        );
        self.run(handler.as_ref(), &proposal, job, actor)
    }

    /// Reverses a succeeded job from the before-state captured when it ran.
    pub fn rollback_job(
        &self,
        job_id: &str,
        actor: &str,
        reason: Option<String>,
    ) -> Result<RollbackOutcome, DispatchError> {
        let job = self.load_job(job_id)?;
        if job.status != JobStatus::Succeeded {
            return Err(DispatchError::InvalidState(format!(
                "job {} is {}; only succeeded jobs can be rolled back",
                job.id, job.status
            )));
        }
        let proposal = self.load_proposal(&job.proposal_id)?;
        let handler = self.handler_for(&proposal)?;

        let started = self.store.rollback_create(RollbackCreateRequest {
            job_id: job.id.clone(),
            actor: actor.to_string(),
            reason,
        })?;
        let (rollback, job) = match started {
            RollbackStartResult::Started { rollback, job } => (rollback, job),
            RollbackStartResult::AlreadyRunning(rollback) => {
                warn!(
                    job_id = job.id.as_str(),
                    rollback_job_id = rollback.id.as_str(),
                    "rollback already running"
                );
                let message = format!("rollback {} is already running", rollback.id);
                return Ok(RollbackOutcome {
                    state: RollbackState::AlreadyInProgress,
                    rollback: Some(rollback),
                    job,
                    reason_code: Some(REASON_ROLLBACK_IN_PROGRESS.to_string()),
                    message: Some(message),
                });
            }
            RollbackStartResult::ResourceBusy(active) => {
                warn!(
                    job_id = job.id.as_str(),
                    active_job_id = active.id.as_str(),
                    "rollback blocked by active job"
                );
                return Ok(RollbackOutcome {
                    state: RollbackState::AlreadyInProgress,
                    rollback: None,
                    job,
                    reason_code: Some(REASON_RESOURCE_BUSY.to_string()),
                    message: Some(format!(
                        "resource {} is owned by active job {}",
                        active.resource_key, active.id
                    )),
                });
            }
        };

        let before = evidence_before(&job);
        let mut outcome = catch_unwind(AssertUnwindSafe(|| {
            handler.revert(&proposal.action, &before)
        }))
        .unwrap_or_else(|_| {
            warn!(rollback_job_id = rollback.id.as_str(), "handler panicked during revert");
            RevertOutcome::failed(REASON_HANDLER_PANIC, "handler panicked during revert")
        });
        if outcome.unresolved {
            warn!(
                rollback_job_id = rollback.id.as_str(),
                "revert write timed out; settling from current state"
            );
            outcome = match self.store.flush_writes(self.config.settle_timeout) {
                Ok(()) => catch_unwind(AssertUnwindSafe(|| {
                    handler.settle_revert(&proposal.action, &before)
                }))
                .unwrap_or_else(|_| RevertOutcome::unresolved("handler panicked while settling")),
                Err(err) => RevertOutcome::unresolved(err.to_string()),
            };
        }

        let finished = self.store.rollback_finish(RollbackFinishRequest {
            rollback_job_id: rollback.id.clone(),
            actor: actor.to_string(),
            success: outcome.success,
            evidence: json!({
                "before": before,
                "restored": outcome.restored,
                "reason_code": outcome.reason_code,
                "message": outcome.message,
            }),
            reason_code: outcome.reason_code.clone(),
            message: outcome.message.clone(),
        })?;
        Ok(RollbackOutcome {
            state: if outcome.success {
                RollbackState::Succeeded
            } else {
                RollbackState::Failed
            },
            rollback: Some(finished.rollback),
            job: finished.job,
            reason_code: outcome.reason_code,
            message: outcome.message,
        })
    }

    /// Decides a job left `running` after its handler write timed out, from
    /// the state the write left behind.
    pub fn settle_job(&self, job_id: &str, actor: &str) -> Result<ExecutionOutcome, DispatchError> {
        let job = self.load_job(job_id)?;
        if !job.outcome_unknown() {
            return Err(DispatchError::InvalidState(format!(
                "job {} is {} with a known outcome; nothing to settle",
                job.id, job.status
            )));
        }
        let proposal = self.load_proposal(&job.proposal_id)?;
        let handler = self.handler_for(&proposal)?;
        self.settle_running(handler.as_ref(), &proposal, job, actor)
    }

    /// `queued -> cancelled`.
    pub fn cancel_job(
        &self,
        job_id: &str,
        actor: &str,
        reason: Option<String>,
    ) -> Result<JobRow, DispatchError> {
        let job = self.load_job(job_id)?;
        if job.status != JobStatus::Queued {
            return Err(DispatchError::InvalidState(format!(
                "job {} is {}; only queued jobs can be cancelled",
                job.id, job.status
            )));
        }
        Ok(self.store.job_cancel(&job.id, actor, reason)?)
    }

    fn run(
        &self,
        handler: &dyn ActionHandler,
        proposal: &ProposalRow,
        job: JobRow,
        actor: &str,
    ) -> Result<ExecutionOutcome, DispatchError> {
        let job = match self.store.job_start(&job.id, actor) {
            Ok(JobStartResult::Started(job)) => job,
            Ok(JobStartResult::ResourceBusy(active)) => {
                let message = format!(
                    "resource {} is owned by active job {}",
                    active.resource_key, active.id
                );
                return Ok(ExecutionOutcome::in_progress(
                    Some(active),
                    REASON_RESOURCE_BUSY,
                    message,
                ));
            }
            Ok(JobStartResult::RollbackInProgress(rollback)) => {
                return Ok(ExecutionOutcome::in_progress(
                    Some(job),
                    REASON_ROLLBACK_IN_PROGRESS,
                    format!(
                        "resource {} is being rolled back by {}",
                        rollback.resource_key, rollback.id
                    ),
                ));
            }
            // Another caller moved the job first.
            Err(StoreError::InvalidTransition(_)) | Err(StoreError::StateConflict { .. }) => {
                let current = self.load_job(&job.id)?;
                return Ok(self.existing(proposal, current));
            }
            Err(err) => return Err(err.into()),
        };

        let mut outcome = catch_unwind(AssertUnwindSafe(|| handler.apply(&proposal.action)))
            .unwrap_or_else(|_| {
                warn!(job_id = job.id.as_str(), "handler panicked during apply");
                ApplyOutcome::failed(REASON_HANDLER_PANIC, "handler panicked during apply")
            });
        if outcome.unresolved {
            warn!(
                job_id = job.id.as_str(),
                "handler write timed out; settling from current state"
            );
            outcome = self.settle(handler, proposal, &job, outcome.before);
        }
        self.finish(proposal, job, actor, outcome)
    }

    /// Picks up a job an earlier call created but did not finish.
    fn resume(
        &self,
        handler: &dyn ActionHandler,
        proposal: &ProposalRow,
        job: JobRow,
        actor: &str,
    ) -> Result<ExecutionOutcome, DispatchError> {
        match job.status {
            // Left behind by a create whose caller gave up waiting.
            JobStatus::Queued => {
                info!(job_id = job.id.as_str(), "adopting queued job");
                self.run(handler, proposal, job, actor)
            }
            JobStatus::Running if job.outcome_unknown() => {
                self.settle_running(handler, proposal, job, actor)
            }
            _ => Ok(self.existing(proposal, job)),
        }
    }

    fn settle_running(
        &self,
        handler: &dyn ActionHandler,
        proposal: &ProposalRow,
        job: JobRow,
        actor: &str,
    ) -> Result<ExecutionOutcome, DispatchError> {
        let before = evidence_before(&job);
        let outcome = self.settle(handler, proposal, &job, before);
        self.finish(proposal, job, actor, outcome)
    }

    /// Waits for every earlier write to land, then lets the handler read
    /// back what its timed-out write did.
    fn settle(
        &self,
        handler: &dyn ActionHandler,
        proposal: &ProposalRow,
        job: &JobRow,
        before: Value,
    ) -> ApplyOutcome {
        if let Err(err) = self.store.flush_writes(self.config.settle_timeout) {
            warn!(
                job_id = job.id.as_str(),
                code = err.code(),
                "writer has not drained; outcome still unknown"
            );
            return ApplyOutcome::unresolved(before, err.to_string());
        }
        catch_unwind(AssertUnwindSafe(|| handler.settle(&proposal.action, &before)))
            .unwrap_or_else(|_| {
                warn!(job_id = job.id.as_str(), "handler panicked while settling");
                ApplyOutcome::unresolved(before.clone(), "handler panicked while settling")
            })
    }

    fn finish(
        &self,
        proposal: &ProposalRow,
        job: JobRow,
        actor: &str,
        outcome: ApplyOutcome,
    ) -> Result<ExecutionOutcome, DispatchError> {
        let evidence = json!({
            "before": outcome.before,
            "after": outcome.after,
            "reason_code": outcome.reason_code,
            "message": outcome.message,
        });

        if outcome.unresolved {
            // Neither succeeded nor failed: the job keeps its resource until
            // a later execute or `settle_job` decides it.
            let job = if job.outcome_unknown() {
                job
            } else {
                match self.store.job_mark_outcome_unknown(
                    &job.id,
                    actor,
                    evidence,
                    outcome.message.clone(),
                ) {
                    Ok(marked) => marked,
                    Err(err) => {
                        warn!(
                            job_id = job.id.as_str(),
                            code = err.code(),
                            "could not record unknown outcome yet"
                        );
                        job
                    }
                }
            };
            return Ok(ExecutionOutcome {
                state: ExecutionState::OutcomeUnknown,
                job: Some(job),
                proposal_status: Some(proposal.status),
                reason_code: outcome.reason_code,
                message: outcome.message,
            });
        }

        if !outcome.success {
            warn!(
                job_id = job.id.as_str(),
                reason_code = outcome.reason_code.as_deref().unwrap_or(""),
                "handler reported failure"
            );
        }
        let finished = match self.store.job_finish(JobFinishRequest {
            job_id: job.id.clone(),
            actor: actor.to_string(),
            success: outcome.success,
            evidence,
            reason_code: outcome.reason_code.clone(),
            message: outcome.message.clone(),
        }) {
            Ok(finished) => finished,
            // Another caller settled the job first.
            Err(StoreError::InvalidTransition(_)) | Err(StoreError::StateConflict { .. }) => {
                let current = self.load_job(&job.id)?;
                return Ok(self.existing(proposal, current));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(ExecutionOutcome {
            state: if outcome.success {
                ExecutionState::Succeeded
            } else {
                ExecutionState::Failed
            },
            job: Some(finished.job),
            proposal_status: Some(finished.proposal_status),
            reason_code: outcome.reason_code,
            message: outcome.message,
        })
    }

    /// A create that timed out may still commit behind the writer queue.
    /// Once the queue has drained the idempotency key says whether it did;
    /// if not, the create is submitted once more.
    fn create_after_timeout(
        &self,
        idempotency_key: &str,
        request: JobCreateRequest,
        timeout: StoreError,
    ) -> Result<JobCreateResult, DispatchError> {
        if let Err(err) = self.store.flush_writes(self.config.settle_timeout) {
            warn!(code = err.code(), "writer has not drained; giving up on job create");
            return Err(timeout.into());
        }
        match self.store.job_by_idempotency_key(idempotency_key)? {
            Some(job) => Ok(JobCreateResult::Existing(job)),
            None => Ok(self.store.job_create(request)?),
        }
    }

    fn existing(&self, proposal: &ProposalRow, job: JobRow) -> ExecutionOutcome {
        info!(
            proposal_id = proposal.id.as_str(),
            job_id = job.id.as_str(),
            job_status = job.status.as_str(),
            "execution collapsed onto existing job"
        );
        let mut outcome = ExecutionOutcome::existing(job);
        outcome.proposal_status = Some(proposal.status);
        outcome
    }

    fn handler_for(&self, proposal: &ProposalRow) -> Result<Arc<dyn ActionHandler>, DispatchError> {
        self.registry
            .get(&proposal.proposal_type())
            .ok_or_else(|| DispatchError::UnsupportedType(proposal.proposal_type().to_string()))
    }

    fn load_proposal(&self, proposal_id: &str) -> Result<ProposalRow, DispatchError> {
        self.store
            .proposal_get(proposal_id)?
            .ok_or_else(|| DispatchError::not_found("proposal", proposal_id))
    }

    fn load_job(&self, job_id: &str) -> Result<JobRow, DispatchError> {
        self.store
            .job_get(job_id)?
            .ok_or_else(|| DispatchError::not_found("job", job_id))
    }
}

fn evidence_before(job: &JobRow) -> Value {
    job.evidence
        .as_ref()
        .and_then(|evidence| evidence.get("before"))
        .cloned()
        .unwrap_or(Value::Null)
}
