#![forbid(unsafe_code)]

pub mod action;
pub mod ids;
pub mod priority;
pub mod risk;
pub mod scope;
pub mod state_machine;
pub mod status;

pub use action::{
    AgentStatusChange, PayloadError, ProposalAction, ProposalType, ProviderToggle, ReassignTask,
    ReprioritizeTask, RunPipeline,
};
pub use ids::{JobId, ProposalId, RollbackJobId, audit_event_id};
pub use priority::{PriorityBand, PriorityTarget};
pub use risk::{RiskLevel, calculate_risk, classify};
pub use scope::ProposalScope;
pub use state_machine::{
    TransitionError, can_transition, can_transition_job, job_transition_table, transition_table,
    validate_job_transition, validate_transition,
};
pub use status::{ExecutionMode, JobStatus, ProposalStatus, RollbackStatus};
