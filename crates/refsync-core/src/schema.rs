use crate::error::TableDataError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

///
/// TableSchema
///
/// The first file of every table directory. Names the logical table and the
/// ordered key fields that identify a row. Immutable once parsed.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TableSchema {
    pub table: String,
    pub keys: Vec<String>,
}

impl TableSchema {
    /// Decode a schema descriptor from the raw JSON of a table's first file.
    ///
    /// `dir` is the table directory name, used only for diagnostics.
    pub fn from_json(dir: &str, raw: &Value) -> Result<Self, TableDataError> {
        let incomplete = || TableDataError::IncompleteSchema {
            table: dir.to_string(),
        };

        let (Some(table), Some(keys)) = (raw.get("table"), raw.get("keys")) else {
            return Err(incomplete());
        };
        let table = table
            .as_str()
            .filter(|name| !name.is_empty())
            .ok_or_else(incomplete)?;
        let keys = keys.as_array().ok_or_else(incomplete)?;
        if keys.is_empty() {
            return Err(TableDataError::EmptyKeys {
                table: dir.to_string(),
            });
        }

        let keys = keys
            .iter()
            .map(|key| key.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(incomplete)?;

        Ok(Self {
            table: table.to_string(),
            keys,
        })
    }

    #[must_use]
    pub fn is_key_field(&self, field: &str) -> bool {
        self.keys.iter().any(|key| key == field)
    }
}

///
/// TESTS
///
