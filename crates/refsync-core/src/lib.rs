//! Reference-data reconciliation engine: validates per-table change files,
//! folds them into one desired state per composite key, diffs that state
//! against a key-value store and applies the minimal set of writes.
//!
//! A run is `index` (validate, fold, expand) then `plan` then, in commit mode,
//! `apply`. See [`engine::Reconciler`].

// public exports are one module level down
pub mod apply;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod expand;
pub mod index;
pub mod key;
pub mod plan;
pub mod record;
pub mod schema;
pub mod store;
pub mod summary;
pub mod validate;

// test
#[cfg(test)]
pub(crate) mod test_support;

use serde_json::Value;
use std::collections::BTreeMap;

///
/// CONSTANTS
///

/// Engine-owned provenance field written on every stored item.
pub const META_FIELD: &str = "_meta";

/// Root entry of a rendered table tree holding the table schema.
pub const SCHEMA_FIELD: &str = "_schema";

/// Planner annotation on a rendered leaf.
pub const COMPARE_RESULT_FIELD: &str = "_compare_result";

/// Executor annotation on a rendered leaf.
pub const RESULT_FIELD: &str = "_result";

/// Fields with this prefix are internal and never diffed.
pub const INTERNAL_PREFIX: &str = "_";

///
/// TYPES
///

/// One JSON object: a record's data or a stored item.
pub type Record = serde_json::Map<String, Value>;

/// One table directory: file name → parsed JSON, in lexical file order.
pub type RawTable = BTreeMap<String, Value>;

/// A whole batch: table directory → its files.
pub type RawBatch = BTreeMap<String, RawTable>;

///
/// Prelude
///

pub mod prelude {
    pub use crate::{
        RawBatch, RawTable, Record,
        config::{RunMode, RunTimestamp, SyncConfig},
        engine::Reconciler,
        error::Error,
        plan::Plan,
        store::{MemoryStore, Store},
        summary::PlanSummary,
    };
}
