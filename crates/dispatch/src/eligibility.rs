#![forbid(unsafe_code)]

use crate::config::DispatchConfig;
use crate::handlers::HandlerRegistry;
use ao_storage::ProposalRow;
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityReason {
    AutoExecuteDisabled,
    UnsupportedType,
    RiskBlocked,
    Eligible,
}

impl EligibilityReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EligibilityReason::AutoExecuteDisabled => "auto_execute_disabled",
            EligibilityReason::UnsupportedType => "unsupported_type",
            EligibilityReason::RiskBlocked => "risk_blocked",
            EligibilityReason::Eligible => "eligible",
        }
    }
}

impl fmt::Display for EligibilityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration gate first, then the type allowlist, then the risk ceiling.
pub fn auto_execute_eligible(
    proposal: &ProposalRow,
    config: &DispatchConfig,
    registry: &HandlerRegistry,
) -> (bool, EligibilityReason) {
    if !config.auto_execute_enabled() {
        return (false, EligibilityReason::AutoExecuteDisabled);
    }
    let kind = proposal.proposal_type();
    if !config.auto_execute_types.contains(&kind) || !registry.supports(&kind) {
        return (false, EligibilityReason::UnsupportedType);
    }
    if proposal.risk_level > config.auto_execute_max_risk {
        return (false, EligibilityReason::RiskBlocked);
    }
    (true, EligibilityReason::Eligible)
}

/// The policy snapshot stored on the proposal at approval time.
pub fn auto_execute_policy(reason: EligibilityReason, config: &DispatchConfig) -> Value {
    json!({
        "reason": reason.as_str(),
        "max_risk": config.auto_execute_max_risk.as_str(),
        "enabled": config.auto_execute_enabled(),
    })
}
