use crate::{Record, RawTable};
use serde_json::Value;

/// Unwrap a `json!` object literal into a record.
pub(crate) fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, found {other}"),
    }
}

/// Build one raw table directory from `(file name, json)` pairs.
pub(crate) fn raw_table<const N: usize>(files: [(&str, Value); N]) -> RawTable {
    files
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}
