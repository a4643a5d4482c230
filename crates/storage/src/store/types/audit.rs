#![forbid(unsafe_code)]

use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
pub struct AuditEventRow {
    pub seq: i64,
    pub event_id: String,
    pub proposal_id: String,
    pub action: String,
    pub actor: String,
    pub at_ms: i64,
    pub details: Value,
}
