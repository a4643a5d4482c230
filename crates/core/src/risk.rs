#![forbid(unsafe_code)]

//! Risk classification. Pure and deterministic: the tier depends only on the
//! action type and its typed payload.

use crate::action::{PayloadError, ProposalAction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn calculate_risk(action: &ProposalAction) -> RiskLevel {
    match action {
        ProposalAction::ReassignTask(_) => RiskLevel::Medium,
        ProposalAction::ReprioritizeTask(action) => {
            if action.priority.band().is_top_two() {
                RiskLevel::Medium
            } else {
                RiskLevel::Low
            }
        }
        ProposalAction::PauseAgent(_) | ProposalAction::ResumeAgent(_) => RiskLevel::High,
        ProposalAction::RunPipeline(pipeline) => {
            if pipeline.tag.as_deref().is_some_and(tag_marks_high) {
                RiskLevel::High
            } else {
                RiskLevel::Medium
            }
        }
        // External side effects that cannot be reverted by this engine.
        ProposalAction::EnableProvider(_) | ProposalAction::DisableProvider(_) => {
            RiskLevel::Critical
        }
        ProposalAction::Other { .. } => RiskLevel::Medium,
    }
}

/// Parses the raw boundary payload and classifies it.
pub fn classify(proposal_type: &str, payload: &Value) -> Result<RiskLevel, PayloadError> {
    ProposalAction::parse(proposal_type, payload).map(|action| calculate_risk(&action))
}

fn tag_marks_high(tag: &str) -> bool {
    tag.split([',', ' ', ':', '/'])
        .map(str::trim)
        .any(|part| part.eq_ignore_ascii_case("critical") || part.eq_ignore_ascii_case("high"))
}
