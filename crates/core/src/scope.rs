#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Targeting info attached to a proposal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposalScope {
    #[default]
    Global,
    Project {
        project_id: String,
    },
}

impl ProposalScope {
    pub fn parse(raw: Option<&Value>) -> Result<Self, String> {
        let Some(raw) = raw else {
            return Ok(Self::Global);
        };
        if raw.is_null() {
            return Ok(Self::Global);
        }
        let scope: ProposalScope = serde_json::from_value(raw.clone())
            .map_err(|err| format!("scope is invalid: {err}"))?;
        if let ProposalScope::Project { project_id } = &scope {
            let trimmed = project_id.trim();
            if trimmed.is_empty() {
                return Err("scope.project_id must not be empty".to_string());
            }
            return Ok(ProposalScope::Project {
                project_id: trimmed.to_string(),
            });
        }
        Ok(scope)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_scope_defaults_to_global() {
        assert_eq!(ProposalScope::parse(None), Ok(ProposalScope::Global));
        assert_eq!(ProposalScope::parse(Some(&json!(null))), Ok(ProposalScope::Global));
    }

    #[test]
    fn project_scope_is_trimmed_and_required() {
        assert_eq!(
            ProposalScope::parse(Some(&json!({"kind": "project", "project_id": " alpha "}))),
            Ok(ProposalScope::Project {
                project_id: "alpha".to_string()
            })
        );
        assert!(ProposalScope::parse(Some(&json!({"kind": "project", "project_id": ""}))).is_err());
        assert!(ProposalScope::parse(Some(&json!({"kind": "galaxy"}))).is_err());
    }

    #[test]
    fn scope_serializes_with_kind_tag() {
        assert_eq!(ProposalScope::Global.to_json(), json!({"kind": "global"}));
    }
}
