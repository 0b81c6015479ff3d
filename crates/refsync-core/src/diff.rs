//! Field-level differ between a desired leaf and the store's current item.
//!
//! Contract:
//! - Internal fields (leading `_`) and key fields are never compared.
//! - An empty-string value for a field the store has means "remove it".
//! - Nested values are compared structurally; a nested object whose only
//!   differing fields are volatile timestamps is equivalent.
//! - A delta consisting solely of a changed modification timestamp is empty.

use crate::{INTERNAL_PREFIX, Record, config::VolatileFields};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

///
/// FieldChange
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FieldChange {
    pub current: Value,
    pub new: Value,
}

///
/// Delta
///
/// `removed` maps each field to the blank value that requested its removal.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Delta {
    pub new: Record,
    pub changed: BTreeMap<String, FieldChange>,
    pub removed: Record,
}

impl Delta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.new.len() + self.changed.len() + self.removed.len()
    }

    /// Fields to upsert: every new field plus the new side of every change.
    #[must_use]
    pub fn set_fields(&self) -> Record {
        let mut set = self.new.clone();
        for (field, change) in &self.changed {
            set.insert(field.clone(), change.new.clone());
        }

        set
    }

    /// Fields to delete from the stored item.
    #[must_use]
    pub fn removed_fields(&self) -> Vec<String> {
        self.removed.keys().cloned().collect()
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let changed = self
            .changed
            .iter()
            .map(|(field, change)| {
                (
                    field.clone(),
                    serde_json::json!({ "current": change.current, "new": change.new }),
                )
            })
            .collect::<Record>();

        serde_json::json!({
            "new": self.new,
            "changed": changed,
            "removed": self.removed,
        })
    }
}

///
/// Differ
///

#[derive(Clone, Copy, Debug)]
pub struct Differ<'a> {
    volatile: &'a VolatileFields,
}

impl<'a> Differ<'a> {
    #[must_use]
    pub const fn new(volatile: &'a VolatileFields) -> Self {
        Self { volatile }
    }

    /// Compute the delta that turns `current` into `new`.
    #[must_use]
    pub fn compare(&self, new: &Record, current: &Record, key_fields: &[String]) -> Delta {
        let mut delta = Delta::default();

        let candidates = new
            .iter()
            .filter(|(field, _)| !field.starts_with(INTERNAL_PREFIX))
            .filter(|(field, _)| !key_fields.iter().any(|key| key == *field));

        for (field, value) in candidates {
            match current.get(field) {
                Some(_) if is_blank(value) => {
                    delta.removed.insert(field.clone(), value.clone());
                }
                Some(existing) => {
                    if !self.volatile.is_created(field) && !self.equivalent(value, existing) {
                        delta.changed.insert(
                            field.clone(),
                            FieldChange {
                                current: existing.clone(),
                                new: value.clone(),
                            },
                        );
                    }
                }
                None if !is_blank(value) => {
                    delta.new.insert(field.clone(), value.clone());
                }
                None => {}
            }
        }

        // a bare modification-timestamp bump is not a change
        if delta.new.is_empty()
            && delta.removed.is_empty()
            && delta.changed.len() == 1
            && delta
                .changed
                .keys()
                .all(|field| self.volatile.is_modified(field))
        {
            delta.changed.clear();
        }

        delta
    }

    /// Structural equivalence ignoring volatile-field churn inside objects.
    ///
    /// Returns `true` when the values are equivalent.
    #[must_use]
    pub fn equivalent(&self, new: &Value, current: &Value) -> bool {
        match (new, current) {
            (Value::Object(new), Value::Object(current)) => {
                let mut differing = new
                    .iter()
                    .filter(|(field, value)| {
                        current
                            .get(*field)
                            .is_none_or(|existing| !self.equivalent(value, existing))
                    })
                    .map(|(field, _)| field)
                    .chain(current.keys().filter(|field| !new.contains_key(*field)));

                differing.all(|field| self.volatile.is_volatile(field))
            }
            (Value::Array(new), Value::Array(current)) => {
                new.len() == current.len()
                    && new
                        .iter()
                        .zip(current)
                        .all(|(new, current)| self.equivalent(new, current))
            }
            (Value::Object(_) | Value::Array(_), _) => false,
            _ => new == current,
        }
    }
}

fn is_blank(value: &Value) -> bool {
    value.as_str().is_some_and(str::is_empty)
}

///
/// TESTS
///
