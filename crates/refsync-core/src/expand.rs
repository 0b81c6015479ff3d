use crate::{META_FIELD, SCHEMA_FIELD, config::RunTimestamp, index::BatchIndex};
use serde_json::Value;

///
/// Expander
///
/// Replaces sentinel placeholders in leaf data with the run timestamp.
/// Engine-owned subtrees (`_meta`, `_schema`) are left alone. A leaf keeps its
/// index position even when one of its key field values is expanded.
///

#[derive(Clone, Copy, Debug)]
pub struct Expander<'a> {
    sentinel: &'a str,
    timestamp: &'a RunTimestamp,
}

impl<'a> Expander<'a> {
    #[must_use]
    pub const fn new(sentinel: &'a str, timestamp: &'a RunTimestamp) -> Self {
        Self {
            sentinel,
            timestamp,
        }
    }

    /// Expand every live leaf of the batch. Returns the number of replacements.
    pub fn expand_batch(&self, batch: &mut BatchIndex) -> usize {
        let mut replaced = 0;
        for table in batch.tables.values_mut() {
            for leaf in table.leaves.values_mut() {
                for value in leaf.key_fields.values_mut() {
                    replaced += self.expand_value(value);
                }
                if let Some(fields) = leaf.body.fields_mut() {
                    for (field, value) in fields.iter_mut() {
                        if !is_reserved(field) {
                            replaced += self.expand_value(value);
                        }
                    }
                }
            }
        }

        tracing::debug!(replaced, sentinel = self.sentinel, "expanded special values");
        replaced
    }

    /// Expand one value in place, recursing through arrays and objects.
    pub fn expand_value(&self, value: &mut Value) -> usize {
        match value {
            Value::String(s) if s.as_str() == self.sentinel => {
                *s = self.timestamp.as_str().to_string();
                1
            }
            Value::Array(items) => items.iter_mut().map(|item| self.expand_value(item)).sum(),
            Value::Object(map) => map
                .iter_mut()
                .filter(|(field, _)| !is_reserved(field))
                .map(|(_, item)| self.expand_value(item))
                .sum(),
            _ => 0,
        }
    }
}

fn is_reserved(field: &str) -> bool {
    field == META_FIELD || field == SCHEMA_FIELD
}

///
/// TESTS
///
