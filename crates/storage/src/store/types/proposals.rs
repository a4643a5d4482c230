#![forbid(unsafe_code)]

use ao_core::{ProposalAction, ProposalScope, ProposalStatus, ProposalType, RiskLevel};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
pub struct ProposalRow {
    pub id: String,
    pub revision: i64,
    pub source: String,
    pub action: ProposalAction,
    pub status: ProposalStatus,
    pub risk_level: RiskLevel,
    pub scope: ProposalScope,
    pub reason: String,
    pub evidence_refs: Vec<String>,
    pub requested_by: String,
    pub requested_at_ms: i64,
    pub reviewed_by: Option<String>,
    pub reviewed_at_ms: Option<i64>,
    pub review_comment: Option<String>,
    pub execution_ref: Option<String>,
    pub auto_execute_eligible: bool,
    pub auto_execute_policy: Option<Value>,
    pub approved_then_auto_execute: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl ProposalRow {
    pub fn proposal_type(&self) -> ProposalType {
        self.action.proposal_type()
    }

    pub fn payload(&self) -> Value {
        self.action.payload_json()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProposalReviewResult {
    pub proposal: ProposalRow,
    pub previous_status: ProposalStatus,
}
