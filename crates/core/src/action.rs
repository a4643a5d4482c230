#![forbid(unsafe_code)]

//! Typed action payloads, one variant per proposal type.
//!
//! Raw JSON is accepted only at the boundary; everything past
//! `ProposalAction::parse` works with the typed variants.

use crate::priority::PriorityTarget;
use serde_json::{Map, Value, json};
use std::fmt;

const MAX_TYPE_LEN: usize = 64;
const MAX_FIELD_LEN: usize = 128;
const MAX_REASON_LEN: usize = 400;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProposalType {
    ReassignTask,
    ReprioritizeTask,
    PauseAgent,
    ResumeAgent,
    RunPipeline,
    EnableProvider,
    DisableProvider,
    Other(String),
}

impl ProposalType {
    pub fn parse(raw: &str) -> Result<Self, PayloadError> {
        let token = raw.trim().to_ascii_lowercase();
        let known = match token.as_str() {
            "reassign_task" => Some(Self::ReassignTask),
            "reprioritize_task" => Some(Self::ReprioritizeTask),
            "pause_agent" => Some(Self::PauseAgent),
            "resume_agent" => Some(Self::ResumeAgent),
            "run_pipeline" => Some(Self::RunPipeline),
            "enable_provider" => Some(Self::EnableProvider),
            "disable_provider" => Some(Self::DisableProvider),
            _ => None,
        };
        if let Some(known) = known {
            return Ok(known);
        }
        if token.is_empty() {
            return Err(PayloadError::new(raw, "proposal_type must not be empty"));
        }
        if token.len() > MAX_TYPE_LEN {
            return Err(PayloadError::new(raw, "proposal_type is too long"));
        }
        let first_ok = token.chars().next().is_some_and(|c| c.is_ascii_lowercase());
        let rest_ok = token
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.');
        if !first_ok || !rest_ok {
            return Err(PayloadError::new(
                raw,
                "proposal_type must match [a-z][a-z0-9_.]*",
            ));
        }
        Ok(Self::Other(token))
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProposalType::ReassignTask => "reassign_task",
            ProposalType::ReprioritizeTask => "reprioritize_task",
            ProposalType::PauseAgent => "pause_agent",
            ProposalType::ResumeAgent => "resume_agent",
            ProposalType::RunPipeline => "run_pipeline",
            ProposalType::EnableProvider => "enable_provider",
            ProposalType::DisableProvider => "disable_provider",
            ProposalType::Other(token) => token,
        }
    }
}

impl fmt::Display for ProposalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadError {
    pub proposal_type: String,
    pub message: String,
}

impl PayloadError {
    fn new(proposal_type: &str, message: impl Into<String>) -> Self {
        Self {
            proposal_type: proposal_type.trim().to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} payload: {}", self.proposal_type, self.message)
    }
}

impl std::error::Error for PayloadError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReassignTask {
    pub task_id: String,
    pub to_agent: String,
    /// Expected current owner; a mismatch fails the action instead of overwriting.
    pub from_agent: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReprioritizeTask {
    pub task_id: String,
    pub priority: PriorityTarget,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentStatusChange {
    pub agent_id: String,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunPipeline {
    pub pipeline_id: String,
    pub tag: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderToggle {
    pub provider: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProposalAction {
    ReassignTask(ReassignTask),
    ReprioritizeTask(ReprioritizeTask),
    PauseAgent(AgentStatusChange),
    ResumeAgent(AgentStatusChange),
    RunPipeline(RunPipeline),
    EnableProvider(ProviderToggle),
    DisableProvider(ProviderToggle),
    Other { proposal_type: String, payload: Value },
}

impl ProposalAction {
    pub fn parse(proposal_type: &str, payload: &Value) -> Result<Self, PayloadError> {
        let kind = ProposalType::parse(proposal_type)?;
        let empty = Map::new();
        let obj = match payload {
            Value::Object(obj) => obj,
            Value::Null => &empty,
            _ => return Err(PayloadError::new(kind.as_str(), "payload must be an object")),
        };
        let fields = Fields {
            kind: kind.as_str(),
            obj,
        };

        let action = match &kind {
            ProposalType::ReassignTask => {
                let task_id = fields.require_string("task_id")?;
                let to_agent = fields.require_string("to_agent")?;
                let from_agent = fields.optional_string("from_agent")?;
                if from_agent.as_deref() == Some(to_agent.as_str()) {
                    return Err(fields.error("to_agent must differ from from_agent"));
                }
                Self::ReassignTask(ReassignTask {
                    task_id,
                    to_agent,
                    from_agent,
                })
            }
            ProposalType::ReprioritizeTask => {
                let task_id = fields.require_string("task_id")?;
                let raw = fields
                    .obj
                    .get("priority")
                    .ok_or_else(|| fields.error("priority is required"))?;
                let priority = PriorityTarget::parse(raw).map_err(|msg| fields.error(msg))?;
                Self::ReprioritizeTask(ReprioritizeTask { task_id, priority })
            }
            ProposalType::PauseAgent | ProposalType::ResumeAgent => {
                let change = AgentStatusChange {
                    agent_id: fields.require_string("agent_id")?,
                    reason: fields.optional_text("reason")?,
                };
                if kind == ProposalType::PauseAgent {
                    Self::PauseAgent(change)
                } else {
                    Self::ResumeAgent(change)
                }
            }
            ProposalType::RunPipeline => Self::RunPipeline(RunPipeline {
                pipeline_id: fields.require_string("pipeline_id")?,
                tag: fields.optional_string("tag")?,
            }),
            ProposalType::EnableProvider => Self::EnableProvider(ProviderToggle {
                provider: fields.require_string("provider")?,
            }),
            ProposalType::DisableProvider => Self::DisableProvider(ProviderToggle {
                provider: fields.require_string("provider")?,
            }),
            ProposalType::Other(token) => Self::Other {
                proposal_type: token.clone(),
                payload: Value::Object(obj.clone()),
            },
        };
        Ok(action)
    }

    pub fn proposal_type(&self) -> ProposalType {
        match self {
            ProposalAction::ReassignTask(_) => ProposalType::ReassignTask,
            ProposalAction::ReprioritizeTask(_) => ProposalType::ReprioritizeTask,
            ProposalAction::PauseAgent(_) => ProposalType::PauseAgent,
            ProposalAction::ResumeAgent(_) => ProposalType::ResumeAgent,
            ProposalAction::RunPipeline(_) => ProposalType::RunPipeline,
            ProposalAction::EnableProvider(_) => ProposalType::EnableProvider,
            ProposalAction::DisableProvider(_) => ProposalType::DisableProvider,
            ProposalAction::Other { proposal_type, .. } => {
                ProposalType::Other(proposal_type.clone())
            }
        }
    }

    /// Canonical payload: the typed variant re-serialized, optional fields omitted when unset.
    pub fn payload_json(&self) -> Value {
        let mut out = Map::new();
        match self {
            ProposalAction::ReassignTask(action) => {
                out.insert("task_id".to_string(), json!(action.task_id));
                out.insert("to_agent".to_string(), json!(action.to_agent));
                if let Some(from) = &action.from_agent {
                    out.insert("from_agent".to_string(), json!(from));
                }
            }
            ProposalAction::ReprioritizeTask(action) => {
                out.insert("task_id".to_string(), json!(action.task_id));
                out.insert("priority".to_string(), action.priority.to_json());
            }
            ProposalAction::PauseAgent(change) | ProposalAction::ResumeAgent(change) => {
                out.insert("agent_id".to_string(), json!(change.agent_id));
                if let Some(reason) = &change.reason {
                    out.insert("reason".to_string(), json!(reason));
                }
            }
            ProposalAction::RunPipeline(action) => {
                out.insert("pipeline_id".to_string(), json!(action.pipeline_id));
                if let Some(tag) = &action.tag {
                    out.insert("tag".to_string(), json!(tag));
                }
            }
            ProposalAction::EnableProvider(toggle) | ProposalAction::DisableProvider(toggle) => {
                out.insert("provider".to_string(), json!(toggle.provider));
            }
            ProposalAction::Other { payload, .. } => return payload.clone(),
        }
        Value::Object(out)
    }

    /// `{proposal_type, payload}` in canonical form; the input to idempotency keys.
    pub fn signature(&self) -> Value {
        json!({
            "proposal_type": self.proposal_type().as_str(),
            "payload": self.payload_json(),
        })
    }
}

struct Fields<'a> {
    kind: &'a str,
    obj: &'a Map<String, Value>,
}

impl Fields<'_> {
    fn error(&self, message: impl Into<String>) -> PayloadError {
        PayloadError::new(self.kind, message)
    }

    fn require_string(&self, key: &str) -> Result<String, PayloadError> {
        self.optional_string(key)?
            .ok_or_else(|| self.error(format!("{key} is required")))
    }

    fn optional_string(&self, key: &str) -> Result<Option<String>, PayloadError> {
        let Some(value) = self.obj.get(key) else {
            return Ok(None);
        };
        let raw = match value {
            Value::Null => return Ok(None),
            Value::String(raw) => raw,
            _ => return Err(self.error(format!("{key} must be a string"))),
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        if trimmed.len() > MAX_FIELD_LEN {
            return Err(self.error(format!("{key} is too long")));
        }
        if trimmed.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(self.error(format!("{key} must not contain whitespace")));
        }
        Ok(Some(trimmed.to_string()))
    }

    fn optional_text(&self, key: &str) -> Result<Option<String>, PayloadError> {
        match self.obj.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(raw)) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                Ok(Some(trimmed.chars().take(MAX_REASON_LEN).collect()))
            }
            Some(_) => Err(self.error(format!("{key} must be a string"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::PriorityBand;

    #[test]
    fn reassign_requires_task_and_target() {
        let action = ProposalAction::parse(
            "reassign_task",
            &json!({"task_id": "T1", "to_agent": "A2", "from_agent": "A1"}),
        )
        .expect("valid reassign");
        assert_eq!(
            action,
            ProposalAction::ReassignTask(ReassignTask {
                task_id: "T1".to_string(),
                to_agent: "A2".to_string(),
                from_agent: Some("A1".to_string()),
            })
        );

        let err = ProposalAction::parse("reassign_task", &json!({"task_id": "T1"}))
            .expect_err("missing to_agent");
        assert_eq!(err.message, "to_agent is required");

        let err = ProposalAction::parse(
            "reassign_task",
            &json!({"task_id": "T1", "to_agent": "A1", "from_agent": "A1"}),
        )
        .expect_err("no-op reassign");
        assert_eq!(err.message, "to_agent must differ from from_agent");
    }

    #[test]
    fn reprioritize_accepts_band_or_value() {
        let band = ProposalAction::parse(
            "reprioritize_task",
            &json!({"task_id": "T2", "priority": "high"}),
        )
        .expect("band");
        let ProposalAction::ReprioritizeTask(band) = band else {
            panic!("expected reprioritize");
        };
        assert_eq!(band.priority, PriorityTarget::Band(PriorityBand::P1));

        let err = ProposalAction::parse(
            "reprioritize_task",
            &json!({"task_id": "T2", "priority": true}),
        )
        .expect_err("bool priority");
        assert_eq!(err.proposal_type, "reprioritize_task");
    }

    #[test]
    fn wrong_field_types_are_rejected() {
        let err = ProposalAction::parse("pause_agent", &json!({"agent_id": 7}))
            .expect_err("numeric agent id");
        assert_eq!(err.message, "agent_id must be a string");
        assert!(ProposalAction::parse("pause_agent", &json!([1, 2])).is_err());
        assert!(ProposalAction::parse("pause_agent", &json!({"agent_id": "a b"})).is_err());
    }

    #[test]
    fn unknown_types_are_kept_as_other() {
        let action = ProposalAction::parse("rotate_keys", &json!({"ring": "blue"}))
            .expect("extensible type");
        assert_eq!(
            action.proposal_type(),
            ProposalType::Other("rotate_keys".to_string())
        );
        assert_eq!(action.payload_json(), json!({"ring": "blue"}));
        assert!(ProposalAction::parse("Rotate Keys!", &json!({})).is_err());
        assert!(ProposalAction::parse("", &json!({})).is_err());
    }

    #[test]
    fn canonical_payload_drops_noise() {
        let action = ProposalAction::parse(
            "pause_agent",
            &json!({"agent_id": " AG1 ", "reason": "  ", "extra": 1}),
        )
        .expect("pause");
        assert_eq!(action.payload_json(), json!({"agent_id": "AG1"}));
        assert_eq!(
            action.signature(),
            json!({"proposal_type": "pause_agent", "payload": {"agent_id": "AG1"}})
        );
    }
}
