#![forbid(unsafe_code)]

use ao_core::ProposalAction;
use ao_storage::ProposalRow;
use serde_json::{Map, Value};

/// Fingerprint of one proposal snapshot: id, `updated_at_ms` and the
/// canonical `{proposal_type, payload}` signature. Any edit bumps
/// `updated_at_ms`, so it yields a new key.
pub fn compute_idempotency_key(proposal: &ProposalRow) -> String {
    use sha2::Digest as _;
    use std::fmt::Write as _;

    let signature = canonical_json(&proposal.action.signature());
    let mut hasher = sha2::Sha256::new();
    hasher.update(proposal.id.as_bytes());
    hasher.update(b"\n");
    hasher.update(proposal.updated_at_ms.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(signature.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// The entity an action mutates. Actions without a shared target only
/// exclude themselves.
pub fn compute_resource_key(proposal: &ProposalRow) -> String {
    match &proposal.action {
        ProposalAction::ReassignTask(action) => format!("task:{}", action.task_id),
        ProposalAction::ReprioritizeTask(action) => format!("task:{}", action.task_id),
        ProposalAction::PauseAgent(change) | ProposalAction::ResumeAgent(change) => {
            format!("agent:{}", change.agent_id)
        }
        _ => format!("proposal:{}", proposal.id),
    }
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    sorted(value).to_string()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), sorted(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ao_core::{ProposalScope, ProposalStatus, RiskLevel};
    use proptest::prelude::*;
    use serde_json::json;

    fn proposal(id: &str, kind: &str, payload: Value, updated_at_ms: i64) -> ProposalRow {
        ProposalRow {
            id: id.to_string(),
            revision: 1,
            source: "planner".to_string(),
            action: ProposalAction::parse(kind, &payload).expect("valid payload"),
            status: ProposalStatus::Approved,
            risk_level: RiskLevel::Medium,
            scope: ProposalScope::Global,
            reason: String::new(),
            evidence_refs: Vec::new(),
            requested_by: "planner".to_string(),
            requested_at_ms: 1,
            reviewed_by: None,
            reviewed_at_ms: None,
            review_comment: None,
            execution_ref: None,
            auto_execute_eligible: false,
            auto_execute_policy: None,
            approved_then_auto_execute: false,
            created_at_ms: 1,
            updated_at_ms,
        }
    }

    #[test]
    fn idempotency_key_tracks_snapshot() {
        let base = proposal("PROP-0001", "pause_agent", json!({"agent_id": "AG1"}), 10);
        let key = compute_idempotency_key(&base);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, compute_idempotency_key(&base.clone()));

        let edited = proposal("PROP-0001", "pause_agent", json!({"agent_id": "AG1"}), 11);
        assert_ne!(key, compute_idempotency_key(&edited));

        let other_payload = proposal("PROP-0001", "pause_agent", json!({"agent_id": "AG2"}), 10);
        assert_ne!(key, compute_idempotency_key(&other_payload));

        let other_id = proposal("PROP-0002", "pause_agent", json!({"agent_id": "AG1"}), 10);
        assert_ne!(key, compute_idempotency_key(&other_id));
    }

    #[test]
    fn resource_keys_name_the_target() {
        let reassign = proposal(
            "PROP-0001",
            "reassign_task",
            json!({"task_id": "T1", "to_agent": "A2"}),
            1,
        );
        assert_eq!(compute_resource_key(&reassign), "task:T1");
        let reprioritize = proposal(
            "PROP-0002",
            "reprioritize_task",
            json!({"task_id": "T1", "priority": "P2"}),
            1,
        );
        assert_eq!(compute_resource_key(&reprioritize), "task:T1");
        let resume = proposal("PROP-0003", "resume_agent", json!({"agent_id": "AG1"}), 1);
        assert_eq!(compute_resource_key(&resume), "agent:AG1");
        let pipeline = proposal(
            "PROP-0004",
            "run_pipeline",
            json!({"pipeline_id": "nightly"}),
            1,
        );
        assert_eq!(compute_resource_key(&pipeline), "proposal:PROP-0004");
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"b": {"z": 1, "a": [ {"y": 2, "x": 1} ]}, "a": null});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":null,"b":{"a":[{"x":1,"y":2}],"z":1}}"#
        );
    }

    proptest! {
        #[test]
        fn key_is_stable_for_equal_snapshots(
            agent in "[A-Za-z0-9]{1,16}",
            updated_at_ms in 0i64..i64::MAX / 2,
        ) {
            let first = proposal("PROP-0007", "pause_agent", json!({"agent_id": agent.clone()}), updated_at_ms);
            let second = proposal("PROP-0007", "pause_agent", json!({"agent_id": agent}), updated_at_ms);
            prop_assert_eq!(compute_idempotency_key(&first), compute_idempotency_key(&second));
        }
    }
}
