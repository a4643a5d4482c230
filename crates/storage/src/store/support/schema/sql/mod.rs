#![forbid(unsafe_code)]

mod audit;
mod core;
mod fleet;
mod indexes;
mod jobs;
mod proposals;

pub(super) fn full_schema_sql() -> String {
    [
        core::SQL,
        proposals::SQL,
        jobs::SQL,
        audit::SQL,
        indexes::SQL,
    ]
    .concat()
}

pub(super) fn fleet_schema_sql() -> &'static str {
    fleet::SQL
}
