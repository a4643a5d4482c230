#![forbid(unsafe_code)]

use super::super::StoreError;
use serde_json::Value;

pub(in crate::store) fn encode_json(value: &Value) -> String {
    value.to_string()
}

pub(in crate::store) fn encode_optional_json(value: Option<&Value>) -> Option<String> {
    value.filter(|value| !value.is_null()).map(encode_json)
}

pub(in crate::store) fn decode_json_column(
    column: &'static str,
    raw: &str,
) -> Result<Value, StoreError> {
    serde_json::from_str(raw)
        .map_err(|err| StoreError::InvalidPayload(format!("stored {column} is not valid json: {err}")))
}

pub(in crate::store) fn decode_optional_json_column(
    column: &'static str,
    raw: Option<String>,
) -> Result<Option<Value>, StoreError> {
    raw.as_deref()
        .map(|raw| decode_json_column(column, raw))
        .transpose()
}
