#![forbid(unsafe_code)]

use std::fmt;

pub const PROPOSAL_ID_PREFIX: &str = "PROP-";
pub const JOB_ID_PREFIX: &str = "JOB-";
pub const ROLLBACK_JOB_ID_PREFIX: &str = "RBK-";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProposalId(String);

impl ProposalId {
    pub fn from_seq(seq: i64) -> Self {
        Self(format!("{PROPOSAL_ID_PREFIX}{seq:04}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    pub fn from_seq(seq: i64) -> Self {
        Self(format!("{JOB_ID_PREFIX}{seq:04}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RollbackJobId(String);

impl RollbackJobId {
    pub fn from_seq(seq: i64) -> Self {
        Self(format!("{ROLLBACK_JOB_ID_PREFIX}{seq:04}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RollbackJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Audit event ids are derived from the ledger's autoincrement sequence.
pub fn audit_event_id(seq: i64) -> String {
    format!("evt_{seq:016}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_seq() {
        assert_eq!(ProposalId::from_seq(7).as_str(), "PROP-0007");
        assert_eq!(JobId::from_seq(12_345).as_str(), "JOB-12345");
        assert_eq!(RollbackJobId::from_seq(1).as_str(), "RBK-0001");
        assert_eq!(ProposalId::from_seq(42).to_string(), "PROP-0042");
        assert_eq!(JobId::from_seq(3).into_string(), "JOB-0003");
    }

    #[test]
    fn audit_event_ids_are_zero_padded() {
        assert_eq!(audit_event_id(3), "evt_0000000000000003");
    }
}
