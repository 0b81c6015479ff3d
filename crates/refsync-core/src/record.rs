use crate::{
    META_FIELD, Record,
    config::RunTimestamp,
    error::TableDataError,
    key::{CompositeKey, KeyExtractError},
    schema::TableSchema,
};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;

///
/// Action
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[display("create")]
    Create,
    #[display("update")]
    Update,
    #[display("delete")]
    Delete,
}

impl Action {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    fn parse(raw: &Value) -> Option<Self> {
        match raw.as_str()? {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

///
/// ChangeRecord
///
/// One validated change file: the requested action, the composite key it
/// targets, and its data fields (key fields included, `_meta` stripped).
///

#[derive(Clone, Debug, PartialEq)]
pub struct ChangeRecord {
    pub action: Action,
    pub key: CompositeKey,
    pub data: Record,
}

impl ChangeRecord {
    /// Decode and validate one change file against its table schema.
    ///
    /// Checks run in a fixed order: shape, key fields, then action.
    pub fn from_json(
        dir: &str,
        file: &str,
        raw: &Value,
        schema: &TableSchema,
    ) -> Result<Self, TableDataError> {
        let (Some(action), Some(Value::Object(data))) = (raw.get("action"), raw.get("data")) else {
            return Err(TableDataError::MissingActionOrData {
                file: file.to_string(),
                table: dir.to_string(),
            });
        };

        let key = CompositeKey::from_record(data, &schema.keys).map_err(|err| match err {
            KeyExtractError::Missing(_) => TableDataError::MissingKeyFields {
                file: file.to_string(),
                table: dir.to_string(),
            },
            KeyExtractError::NonScalar(field) => TableDataError::NonScalarKey {
                file: file.to_string(),
                table: dir.to_string(),
                field,
            },
        })?;

        let action = Action::parse(action).ok_or_else(|| TableDataError::UnknownAction {
            file: file.to_string(),
            table: dir.to_string(),
            action: action.as_str().map_or_else(|| action.to_string(), str::to_string),
        })?;

        let mut data = data.clone();
        data.remove(META_FIELD);

        Ok(Self { action, key, data })
    }
}

///
/// Meta
///
/// Provenance stamped on every leaf: which file last touched it, with which
/// action, at which run timestamp. Written to the store as `_meta`.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Meta {
    pub ref_file: String,
    pub action: Action,
    pub timestamp: RunTimestamp,
}

impl Meta {
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "ref_file": self.ref_file,
            "action": self.action.as_str(),
            "timestamp": self.timestamp.as_str(),
        })
    }
}

///
/// TESTS
///
