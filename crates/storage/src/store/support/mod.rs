#![forbid(unsafe_code)]

mod clock;
mod constraints;
mod counters;
mod json;
mod savepoint;
mod schema;

pub(in crate::store) use constraints::{ConstraintKind, classify_constraint_violation};
pub(in crate::store) use counters::next_counter_tx;
pub(in crate::store) use json::{
    decode_json_column, decode_optional_json_column, encode_json, encode_optional_json,
};
pub(in crate::store) use schema::{
    fleet_install_schema_tx, install_schema, preflight_gate, require_fleet_table,
};
pub(in crate::store) use savepoint::in_savepoint;
pub(in crate::store) use clock::{next_updated_at_ms, now_ms};

pub use clock::ts_ms_to_rfc3339;
