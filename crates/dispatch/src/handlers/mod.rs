#![forbid(unsafe_code)]
//! Action handlers: the boundary to the business layer.
//!
//! Each handler captures a before-state, applies its action and can revert
//! it from that before-state. Failures come back as values; the engine never
//! sees a handler error as a fault.
//!
//! A write that timed out may still commit. Handlers report that as
//! `unresolved` instead of failed, and `settle` later decides from the
//! state actually on disk.

mod agent_status;
mod reassign;
mod reprioritize;

pub use agent_status::{AgentStatusHandler, AgentStatusTarget};
pub use reassign::ReassignTaskHandler;
pub use reprioritize::ReprioritizeTaskHandler;

use ao_core::{ProposalAction, ProposalType};
use ao_storage::{SqliteStore, StoreError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const REASON_PRECONDITION_FAILED: &str = "PRECONDITION_FAILED";
pub const REASON_NOT_FOUND: &str = "NOT_FOUND";
pub const REASON_INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
pub const REASON_HANDLER_PANIC: &str = "HANDLER_PANIC";
pub const REASON_OUTCOME_UNKNOWN: &str = "OUTCOME_UNKNOWN";
/// The timed-out write has drained and the target state is not there.
pub const REASON_NOT_APPLIED: &str = "NOT_APPLIED";

#[derive(Clone, Debug, PartialEq)]
pub struct ApplyOutcome {
    pub success: bool,
    /// The write may or may not have landed; `success` is meaningless.
    pub unresolved: bool,
    pub before: Value,
    pub after: Value,
    pub reason_code: Option<String>,
    pub message: Option<String>,
}

impl ApplyOutcome {
    pub fn applied(before: Value, after: Value) -> Self {
        Self {
            success: true,
            unresolved: false,
            before,
            after,
            reason_code: None,
            message: None,
        }
    }

    pub fn failed(reason_code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            unresolved: false,
            before: Value::Null,
            after: Value::Null,
            reason_code: Some(reason_code.to_string()),
            message: Some(message.into()),
        }
    }

    /// `before` is the state read ahead of the write; settling needs it.
    pub fn unresolved(before: Value, message: impl Into<String>) -> Self {
        Self {
            success: false,
            unresolved: true,
            before,
            after: Value::Null,
            reason_code: Some(REASON_OUTCOME_UNKNOWN.to_string()),
            message: Some(message.into()),
        }
    }

    /// A write timeout is unresolved, anything else failed.
    pub fn from_write_error(before: Value, err: &StoreError) -> Self {
        match err {
            StoreError::WriteTimeout { .. } => Self::unresolved(before, err.to_string()),
            _ => Self::from_store_error(err),
        }
    }

    pub fn from_store_error(err: &StoreError) -> Self {
        Self::failed(err.code(), err.to_string())
    }

    fn not_applied(before: Value) -> Self {
        let mut outcome = Self::failed(
            REASON_NOT_APPLIED,
            "write timed out and the change is not in place",
        );
        outcome.before = before;
        outcome
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RevertOutcome {
    pub success: bool,
    pub unresolved: bool,
    /// The state written back; `Null` when nothing was restored.
    pub restored: Value,
    pub reason_code: Option<String>,
    pub message: Option<String>,
}

impl RevertOutcome {
    pub fn reverted(restored: Value) -> Self {
        Self {
            success: true,
            unresolved: false,
            restored,
            reason_code: None,
            message: None,
        }
    }

    pub fn failed(reason_code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            unresolved: false,
            restored: Value::Null,
            reason_code: Some(reason_code.to_string()),
            message: Some(message.into()),
        }
    }

    pub fn unresolved(message: impl Into<String>) -> Self {
        Self {
            unresolved: true,
            ..Self::failed(REASON_OUTCOME_UNKNOWN, message)
        }
    }

    pub fn from_write_error(err: &StoreError) -> Self {
        match err {
            StoreError::WriteTimeout { .. } => Self::unresolved(err.to_string()),
            _ => Self::from_store_error(err),
        }
    }

    pub fn from_store_error(err: &StoreError) -> Self {
        Self::failed(err.code(), err.to_string())
    }

    fn not_applied() -> Self {
        Self::failed(
            REASON_NOT_APPLIED,
            "write timed out and the before-state is not in place",
        )
    }
}

pub trait ActionHandler: Send + Sync {
    fn proposal_type(&self) -> ProposalType;

    fn apply(&self, action: &ProposalAction) -> ApplyOutcome;

    fn revert(&self, action: &ProposalAction, before: &Value) -> RevertOutcome;

    /// Decides an unresolved `apply` once every earlier write has drained,
    /// by reading the current state. `before` is what `apply` read first.
    /// Handlers that cannot tell leave it unresolved.
    fn settle(&self, action: &ProposalAction, before: &Value) -> ApplyOutcome {
        let _ = action;
        ApplyOutcome::unresolved(before.clone(), "handler cannot inspect its target")
    }

    /// `settle` for an unresolved `revert`.
    fn settle_revert(&self, action: &ProposalAction, before: &Value) -> RevertOutcome {
        let _ = (action, before);
        RevertOutcome::unresolved("handler cannot inspect its target")
    }
}

/// Maps proposal types to their handlers. Registering a type twice replaces
/// the earlier handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ProposalType, Arc<dyn ActionHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.types())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `reassign_task`, `reprioritize_task`, `pause_agent` and `resume_agent`
    /// over the fleet tables.
    pub fn with_reference_handlers(store: Arc<SqliteStore>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ReassignTaskHandler::new(Arc::clone(&store))));
        registry.register(Arc::new(ReprioritizeTaskHandler::new(Arc::clone(&store))));
        registry.register(Arc::new(AgentStatusHandler::new(
            Arc::clone(&store),
            AgentStatusTarget::Paused,
        )));
        registry.register(Arc::new(AgentStatusHandler::new(
            store,
            AgentStatusTarget::Active,
        )));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(handler.proposal_type(), handler);
    }

    pub fn get(&self, kind: &ProposalType) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn supports(&self, kind: &ProposalType) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Sorted type tokens.
    pub fn types(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .handlers
            .keys()
            .map(|kind| kind.as_str().to_string())
            .collect();
        out.sort();
        out
    }
}

fn mismatched_action(expected: &str, action: &ProposalAction) -> String {
    format!(
        "{expected} handler received a {} action",
        action.proposal_type()
    )
}
