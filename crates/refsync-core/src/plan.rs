//! Reconciliation planner.
//!
//! Reads the current store item once per leaf and annotates the leaf with a
//! [`CompareResult`]. Planning never writes to the store.

use crate::{
    Record,
    config::SyncConfig,
    diff::{Delta, Differ},
    error::{Error, ErrorOrigin},
    index::{BatchIndex, Leaf, TableIndex},
    record::Action,
    store::Store,
    summary::PlanSummary,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

///
/// ItemState
///
/// What the planner found in the store for one key.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Exists,
    DoesNotExist,
    ExistsNoChanges,
}

impl ItemState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exists => "exists",
            Self::DoesNotExist => "does_not_exist",
            Self::ExistsNoChanges => "exists_no_changes",
        }
    }
}

///
/// PlannedAction
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlannedAction {
    Create,
    Update,
    Delete,
    None,
}

impl PlannedAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::None => "none",
        }
    }

    #[must_use]
    pub const fn mutates(self) -> bool {
        !matches!(self, Self::None)
    }
}

///
/// CompareResult
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CompareResult {
    pub state: ItemState,
    pub action: PlannedAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
}

impl CompareResult {
    const fn new(state: ItemState, action: PlannedAction) -> Self {
        Self {
            state,
            action,
            delta: None,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut out = Record::new();
        out.insert("state".to_string(), Value::from(self.state.as_str()));
        out.insert("action".to_string(), Value::from(self.action.as_str()));
        if let Some(delta) = &self.delta {
            out.insert("delta".to_string(), delta.to_json());
        }

        Value::Object(out)
    }
}

///
/// Plan
///
/// A batch whose every leaf carries a [`CompareResult`].
/// Only the planner builds one, so nothing can be applied unplanned.
///

#[derive(Clone, Debug)]
pub struct Plan {
    batch: BatchIndex,
    config: SyncConfig,
    applied: bool,
}

impl Plan {
    #[must_use]
    pub const fn batch(&self) -> &BatchIndex {
        &self.batch
    }

    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub const fn is_applied(&self) -> bool {
        self.applied
    }

    #[must_use]
    pub fn into_batch(self) -> BatchIndex {
        self.batch
    }

    #[must_use]
    pub fn to_tree(&self) -> Value {
        self.batch.to_tree()
    }

    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        PlanSummary::collect(&self.batch, &self.config)
    }

    pub(crate) const fn batch_mut(&mut self) -> &mut BatchIndex {
        &mut self.batch
    }

    pub(crate) const fn mark_applied(&mut self) {
        self.applied = true;
    }
}

///
/// Planner
///

pub struct Planner<'a, S: Store + ?Sized> {
    config: &'a SyncConfig,
    store: &'a S,
}

impl<'a, S: Store + ?Sized> Planner<'a, S> {
    #[must_use]
    pub const fn new(config: &'a SyncConfig, store: &'a S) -> Self {
        Self { config, store }
    }

    /// Compare every leaf of the batch against the store.
    ///
    /// A store failure aborts planning and is returned unmodified.
    pub fn plan(&self, mut batch: BatchIndex) -> Result<Plan, Error> {
        for table in batch.tables.values_mut() {
            self.plan_table(table)?;
        }

        Ok(Plan {
            batch,
            config: self.config.clone(),
            applied: false,
        })
    }

    fn plan_table(&self, table: &mut TableIndex) -> Result<(), Error> {
        let TableIndex { schema, leaves, .. } = table;
        let store_table = self.config.store_table(&schema.table);

        for leaf in leaves.values_mut() {
            let key = leaf.item_key(&store_table, &schema.keys);
            let current = self
                .store
                .get_consistent(&key)
                .map_err(|err| Error::store(ErrorOrigin::Plan, err))?;

            let compare = self.compare_leaf(leaf, current.as_ref(), &schema.keys);
            tracing::debug!(
                table = %store_table,
                key = %key.key,
                requested = %leaf.action(),
                state = compare.state.as_str(),
                planned = compare.action.as_str(),
                "planned leaf"
            );
            leaf.compare = Some(compare);
        }

        Ok(())
    }

    /// Decide what to do with one leaf given the store's current item.
    #[must_use]
    pub fn compare_leaf(&self, leaf: &Leaf, current: Option<&Record>, keys: &[String]) -> CompareResult {
        match (leaf.action(), current) {
            (Action::Create, Some(_)) => CompareResult::new(ItemState::Exists, PlannedAction::None),
            (Action::Create, None) => {
                CompareResult::new(ItemState::DoesNotExist, PlannedAction::Create)
            }

            (Action::Update, Some(current)) => {
                let delta = Differ::new(&self.config.volatile).compare(&leaf.desired(), current, keys);
                let (state, action) = if delta.is_empty() {
                    (ItemState::ExistsNoChanges, PlannedAction::None)
                } else {
                    (ItemState::Exists, PlannedAction::Update)
                };

                CompareResult {
                    state,
                    action,
                    delta: Some(delta),
                }
            }
            (Action::Update, None) => {
                // the batch created this key earlier, so the store is out of step
                tracing::warn!(key = %leaf.key, ref_file = %leaf.ref_file, "update target missing from store, skipping");
                CompareResult::new(ItemState::DoesNotExist, PlannedAction::None)
            }

            (Action::Delete, Some(_)) => CompareResult::new(ItemState::Exists, PlannedAction::Delete),
            (Action::Delete, None) => CompareResult::new(ItemState::DoesNotExist, PlannedAction::None),
        }
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::RunTimestamp,
        index::IndexBuilder,
        key::{CompositeKey, KeyValue},
        store::{ItemKey, ItemPatch, MemoryStore, StoreError},
        test_support::{raw_table, record},
    };
    use serde_json::json;

    fn ts() -> RunTimestamp {
        RunTimestamp::fixed("2024-06-01T00:00:00.000000")
    }

    fn batch(files: Vec<(&str, Value)>) -> BatchIndex {
        let mut table = raw_table([("000_schema.json", json!({ "table": "t", "keys": ["id"] }))]);
        table.extend(files.into_iter().map(|(name, raw)| (name.to_string(), raw)));
        let raw = [("t".to_string(), table)].into_iter().collect();

        IndexBuilder::new(&ts()).build(&raw).expect("batch should index")
    }

    fn compare_of(plan: &Plan, id: i64) -> CompareResult {
        plan.batch()
            .table("t")
            .and_then(|table| table.get(&CompositeKey::new(vec![KeyValue::Int(id)])))
            .and_then(|leaf| leaf.compare.clone())
            .expect("leaf should be planned")
    }

    fn seeded(items: Vec<Value>) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .seed_table("t", &["id".to_string()], items.into_iter().map(record).collect())
            .expect("seed");

        store
    }

    #[test]
    fn create_plans_against_presence() {
        let batch = batch(vec![
            ("001.json", json!({ "action": "create", "data": { "id": 1, "v": "a" } })),
            ("002.json", json!({ "action": "create", "data": { "id": 2, "v": "b" } })),
        ]);
        let store = seeded(vec![json!({ "id": 1, "v": "old" })]);
        let config = SyncConfig::default();

        let plan = Planner::new(&config, &store).plan(batch).expect("plan");

        assert_eq!(
            compare_of(&plan, 1),
            CompareResult::new(ItemState::Exists, PlannedAction::None)
        );
        assert_eq!(
            compare_of(&plan, 2),
            CompareResult::new(ItemState::DoesNotExist, PlannedAction::Create)
        );
    }

    #[test]
    fn update_with_changes_carries_delta() {
        let batch = batch(vec![
            ("001.json", json!({ "action": "create", "data": { "id": 1, "v": "a" } })),
            ("002.json", json!({ "action": "update", "data": { "id": 1, "v": "b", "w": "" } })),
        ]);
        let store = seeded(vec![json!({ "id": 1, "v": "a", "w": 3 })]);
        let config = SyncConfig::default();

        let compare = compare_of(&Planner::new(&config, &store).plan(batch).expect("plan"), 1);

        assert_eq!(compare.state, ItemState::Exists);
        assert_eq!(compare.action, PlannedAction::Update);
        let delta = compare.delta.expect("update carries a delta");
        assert_eq!(delta.set_fields(), record(json!({ "v": "b" })));
        assert_eq!(delta.removed_fields(), vec!["w".to_string()]);
    }

    #[test]
    fn update_without_changes_is_a_no_op() {
        let batch = batch(vec![
            ("001.json", json!({ "action": "create", "data": { "id": 1, "v": "a" } })),
            (
                "002.json",
                json!({ "action": "update", "data": { "id": 1, "dt_modified": "new" } }),
            ),
        ]);
        let store = seeded(vec![json!({ "id": 1, "v": "a", "dt_modified": "old", "_meta": {} })]);
        let config = SyncConfig::default();

        let compare = compare_of(&Planner::new(&config, &store).plan(batch).expect("plan"), 1);

        assert_eq!(compare.state, ItemState::ExistsNoChanges);
        assert_eq!(compare.action, PlannedAction::None);
        assert_eq!(compare.delta, Some(Delta::default()));
    }

    #[test]
    fn update_and_delete_of_missing_item_do_nothing() {
        let batch = batch(vec![
            ("001.json", json!({ "action": "create", "data": { "id": 1 } })),
            ("002.json", json!({ "action": "create", "data": { "id": 2 } })),
            ("003.json", json!({ "action": "update", "data": { "id": 1, "v": 1 } })),
            ("004.json", json!({ "action": "delete", "data": { "id": 2 } })),
        ]);
        let store = MemoryStore::new();
        let config = SyncConfig::default();

        let plan = Planner::new(&config, &store).plan(batch).expect("plan");

        for id in [1, 2] {
            assert_eq!(
                compare_of(&plan, id),
                CompareResult::new(ItemState::DoesNotExist, PlannedAction::None)
            );
        }
    }

    #[test]
    fn delete_of_present_item_is_planned() {
        let batch = batch(vec![
            ("001.json", json!({ "action": "create", "data": { "id": 1 } })),
            ("002.json", json!({ "action": "delete", "data": { "id": 1 } })),
        ]);
        let store = seeded(vec![json!({ "id": 1, "v": "x" })]);
        let config = SyncConfig::default();

        let plan = Planner::new(&config, &store).plan(batch).expect("plan");

        assert_eq!(
            compare_of(&plan, 1),
            CompareResult::new(ItemState::Exists, PlannedAction::Delete)
        );
        assert_eq!(store.len("t"), 1);
    }

    #[test]
    fn env_prefix_selects_store_table() {
        let batch = batch(vec![(
            "001.json",
            json!({ "action": "create", "data": { "id": 1 } }),
        )]);
        let store = MemoryStore::new();
        store
            .seed_table("dev_t", &["id".to_string()], vec![record(json!({ "id": 1 }))])
            .expect("seed");
        let config = SyncConfig {
            env_prefix: Some("dev".to_string()),
            ..SyncConfig::default()
        };

        let plan = Planner::new(&config, &store).plan(batch).expect("plan");

        assert_eq!(compare_of(&plan, 1).state, ItemState::Exists);
    }

    struct FailingStore;

    impl Store for FailingStore {
        fn get_consistent(&self, _: &ItemKey) -> Result<Option<Record>, StoreError> {
            Err(StoreError::Unavailable {
                message: "throttled".to_string(),
            })
        }

        fn put_if_absent(&self, _: &ItemKey, _: Record) -> Result<bool, StoreError> {
            Ok(true)
        }

        fn patch(&self, _: &ItemKey, _: &ItemPatch) -> Result<(), StoreError> {
            Ok(())
        }

        fn delete(&self, _: &ItemKey) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn store_read_failure_propagates() {
        let batch = batch(vec![(
            "001.json",
            json!({ "action": "create", "data": { "id": 1 } }),
        )]);
        let config = SyncConfig::default();

        let err = Planner::new(&config, &FailingStore)
            .plan(batch)
            .expect_err("read failure should abort planning");

        assert_eq!(err.origin, ErrorOrigin::Plan);
        assert!(matches!(
            err.store_error(),
            Some(StoreError::Unavailable { message }) if message == "throttled"
        ));
    }

    #[test]
    fn compare_result_renders_delta() {
        let compare = CompareResult {
            state: ItemState::Exists,
            action: PlannedAction::Update,
            delta: Some(Delta {
                new: record(json!({ "b": 1 })),
                ..Delta::default()
            }),
        };

        assert_eq!(
            compare.to_json(),
            json!({
                "state": "exists",
                "action": "update",
                "delta": { "new": { "b": 1 }, "changed": {}, "removed": {} },
            })
        );
        assert_eq!(
            serde_json::to_value(&compare).expect("compare serializes")["state"],
            json!("exists")
        );
    }
}
