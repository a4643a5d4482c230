#![forbid(unsafe_code)]

//! Proposal and job transition tables.
//!
//! Self-transitions are not listed, so they are rejected like any other pair
//! that is absent from the table.

use crate::status::{JobStatus, ProposalStatus};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: String,
    pub to: String,
    pub reason: Option<String>,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(
                f,
                "invalid {} transition {} -> {} ({reason})",
                self.entity, self.from, self.to
            ),
            None => write!(
                f,
                "invalid {} transition {} -> {}",
                self.entity, self.from, self.to
            ),
        }
    }
}

impl std::error::Error for TransitionError {}

pub fn transition_table(status: ProposalStatus) -> &'static [ProposalStatus] {
    use ProposalStatus::*;
    match status {
        Pending => &[Approved, Rejected, Cancelled],
        Approved => &[Executed, Failed],
        Rejected | Cancelled | Executed | Failed => &[],
    }
}

pub fn can_transition(current: ProposalStatus, target: ProposalStatus) -> bool {
    transition_table(current).contains(&target)
}

pub fn validate_transition(
    current: ProposalStatus,
    target: ProposalStatus,
    reason: Option<&str>,
) -> Result<(), TransitionError> {
    if can_transition(current, target) {
        return Ok(());
    }
    Err(TransitionError {
        entity: "proposal",
        from: current.as_str().to_string(),
        to: target.as_str().to_string(),
        reason: reason.map(str::to_string),
    })
}

pub fn job_transition_table(status: JobStatus) -> &'static [JobStatus] {
    use JobStatus::*;
    match status {
        Queued => &[Running, Cancelled],
        Running => &[Succeeded, Failed],
        Failed => &[Running],
        Succeeded => &[RolledBack],
        Cancelled | RolledBack => &[],
    }
}

pub fn can_transition_job(current: JobStatus, target: JobStatus) -> bool {
    job_transition_table(current).contains(&target)
}

pub fn validate_job_transition(
    current: JobStatus,
    target: JobStatus,
    reason: Option<&str>,
) -> Result<(), TransitionError> {
    if can_transition_job(current, target) {
        return Ok(());
    }
    Err(TransitionError {
        entity: "job",
        from: current.as_str().to_string(),
        to: target.as_str().to_string(),
        reason: reason.map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn proposal_status() -> impl Strategy<Value = ProposalStatus> {
        proptest::sample::select(ProposalStatus::ALL.to_vec())
    }

    fn job_status() -> impl Strategy<Value = JobStatus> {
        proptest::sample::select(JobStatus::ALL.to_vec())
    }

    #[test]
    fn pending_fans_out_to_review_outcomes() {
        assert!(can_transition(ProposalStatus::Pending, ProposalStatus::Approved));
        assert!(can_transition(ProposalStatus::Pending, ProposalStatus::Rejected));
        assert!(can_transition(ProposalStatus::Pending, ProposalStatus::Cancelled));
        assert!(can_transition(ProposalStatus::Approved, ProposalStatus::Executed));
        assert!(can_transition(ProposalStatus::Approved, ProposalStatus::Failed));
    }

    #[test]
    fn skipping_approval_is_rejected_with_pair() {
        let err = validate_transition(
            ProposalStatus::Pending,
            ProposalStatus::Executed,
            Some("execute requested"),
        )
        .expect_err("pending -> executed must be rejected");
        assert_eq!(err.from, "pending");
        assert_eq!(err.to, "executed");
        assert_eq!(
            err.to_string(),
            "invalid proposal transition pending -> executed (execute requested)"
        );
    }

    #[test]
    fn self_transitions_are_not_privileged() {
        for status in ProposalStatus::ALL {
            assert!(!can_transition(status, status), "{status} -> {status}");
        }
        for status in JobStatus::ALL {
            assert!(!can_transition_job(status, status), "{status} -> {status}");
        }
    }

    #[test]
    fn job_retry_and_rollback_edges() {
        assert!(can_transition_job(JobStatus::Failed, JobStatus::Running));
        assert!(can_transition_job(JobStatus::Succeeded, JobStatus::RolledBack));
        assert!(!can_transition_job(JobStatus::RolledBack, JobStatus::RolledBack));
        assert!(!can_transition_job(JobStatus::Running, JobStatus::Cancelled));
    }

    proptest! {
        #[test]
        fn validate_agrees_with_table(from in proposal_status(), to in proposal_status()) {
            let listed = transition_table(from).contains(&to);
            prop_assert_eq!(validate_transition(from, to, None).is_ok(), listed);
        }

        #[test]
        fn terminal_statuses_never_move(from in proposal_status(), to in proposal_status()) {
            if from.is_terminal() {
                prop_assert!(validate_transition(from, to, None).is_err());
            }
        }

        #[test]
        fn job_validate_agrees_with_table(from in job_status(), to in job_status()) {
            let listed = job_transition_table(from).contains(&to);
            prop_assert_eq!(validate_job_transition(from, to, None).is_ok(), listed);
        }
    }
}
