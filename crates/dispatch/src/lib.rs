#![forbid(unsafe_code)]

pub mod config;
mod eligibility;
mod engine;
mod error;
pub mod handlers;
mod keys;
mod outcome;
mod service;

pub use config::{DeploymentMode, DispatchConfig};
pub use eligibility::{EligibilityReason, auto_execute_eligible, auto_execute_policy};
pub use engine::DispatchEngine;
pub use error::DispatchError;
pub use handlers::{ActionHandler, ApplyOutcome, HandlerRegistry, RevertOutcome};
pub use keys::{canonical_json, compute_idempotency_key, compute_resource_key};
pub use outcome::{ExecutionOutcome, ExecutionState, RollbackOutcome, RollbackState};
pub use service::{ApprovalOutcome, CreateProposal, DispatchService};
