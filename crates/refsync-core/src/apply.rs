//! Apply executor.
//!
//! Issues exactly one store write per planned mutation. A lost
//! conditional-create race is recorded as [`ApplyResult::NotCompleted`];
//! every other store failure aborts the run unmodified.

use crate::{
    error::{Error, ErrorOrigin},
    index::{Leaf, TableIndex},
    plan::{Plan, PlannedAction},
    store::{ItemPatch, Store, StoreError},
    summary::PlanSummary,
};
use serde::{Deserialize, Serialize};

///
/// ApplyResult
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyResult {
    Completed,
    NotCompleted,
}

impl ApplyResult {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::NotCompleted => "not_completed",
        }
    }
}

///
/// Executor
///

pub struct Executor<'a, S: Store + ?Sized> {
    store: &'a S,
}

impl<'a, S: Store + ?Sized> Executor<'a, S> {
    #[must_use]
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Apply every planned mutation. A plan can be applied once.
    ///
    /// After a store failure the plan stays unapplied; applying it again
    /// resumes with the leaves that have no outcome yet.
    pub fn apply(&self, plan: &mut Plan) -> Result<PlanSummary, Error> {
        if plan.is_applied() {
            return Err(Error::invariant(
                ErrorOrigin::Apply,
                "plan has already been applied",
            ));
        }

        let config = plan.config().clone();
        for table in plan.batch_mut().tables.values_mut() {
            let store_table = config.store_table(&table.schema.table);
            self.apply_table(&store_table, table)?;
        }
        plan.mark_applied();

        let summary = plan.summary();
        tracing::info!(
            completed = summary.completed(),
            not_completed = summary.not_completed(),
            "applied plan"
        );

        Ok(summary)
    }

    fn apply_table(&self, store_table: &str, table: &mut TableIndex) -> Result<(), Error> {
        let TableIndex { schema, leaves, .. } = table;

        for leaf in leaves.values_mut().filter(|leaf| leaf.outcome.is_none()) {
            if let Some(outcome) = self.apply_leaf(store_table, &schema.keys, leaf)? {
                leaf.outcome = Some(outcome);
            }
        }

        Ok(())
    }

    /// Execute one leaf's planned action. `None` when nothing was written.
    fn apply_leaf(
        &self,
        store_table: &str,
        keys: &[String],
        leaf: &Leaf,
    ) -> Result<Option<ApplyResult>, Error> {
        let Some(compare) = &leaf.compare else {
            return Ok(None);
        };
        let key = leaf.item_key(store_table, keys);
        let store_err = |err: StoreError| Error::store(ErrorOrigin::Apply, err);

        let outcome = match compare.action {
            PlannedAction::None => return Ok(None),

            PlannedAction::Create => {
                if self.store.put_if_absent(&key, leaf.to_item()).map_err(store_err)? {
                    ApplyResult::Completed
                } else {
                    tracing::warn!(
                        table = %store_table,
                        key = %key.key,
                        "conditional create lost to a concurrent writer"
                    );
                    ApplyResult::NotCompleted
                }
            }

            PlannedAction::Update => {
                let Some(delta) = &compare.delta else {
                    return Err(Error::invariant(
                        ErrorOrigin::Apply,
                        format!("update planned without a delta for {store_table} {}", key.key),
                    ));
                };
                let patch = ItemPatch {
                    set: delta.set_fields(),
                    remove: delta.removed_fields(),
                    meta: leaf.meta(),
                };
                self.store.patch(&key, &patch).map_err(store_err)?;

                ApplyResult::Completed
            }

            PlannedAction::Delete => {
                self.store.delete(&key).map_err(store_err)?;

                ApplyResult::Completed
            }
        };

        tracing::debug!(
            table = %store_table,
            key = %key.key,
            action = compare.action.as_str(),
            outcome = outcome.as_str(),
            "applied leaf"
        );

        Ok(Some(outcome))
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        META_FIELD, Record,
        config::{RunTimestamp, SyncConfig},
        index::IndexBuilder,
        key::{CompositeKey, KeyValue},
        plan::Planner,
        store::{ItemKey, MemoryStore},
        test_support::{raw_table, record},
    };
    use serde_json::{Value, json};
    use std::cell::Cell;

    fn ts() -> RunTimestamp {
        RunTimestamp::fixed("2024-06-01T00:00:00.000000")
    }

    fn plan_against<S: Store>(store: &S, files: Vec<(&str, Value)>) -> Plan {
        let mut table = raw_table([("000_schema.json", json!({ "table": "t", "keys": ["id"] }))]);
        table.extend(files.into_iter().map(|(name, raw)| (name.to_string(), raw)));
        let raw = [("t".to_string(), table)].into_iter().collect();

        let batch = IndexBuilder::new(&ts()).build(&raw).expect("batch should index");
        Planner::new(&SyncConfig::default(), store)
            .plan(batch)
            .expect("plan")
    }

    fn id(n: i64) -> CompositeKey {
        CompositeKey::new(vec![KeyValue::Int(n)])
    }

    fn outcome_of(plan: &Plan, n: i64) -> Option<ApplyResult> {
        plan.batch()
            .table("t")
            .and_then(|table| table.get(&id(n)))
            .and_then(|leaf| leaf.outcome)
    }

    #[test]
    fn create_update_and_delete_are_written() {
        let store = MemoryStore::new();
        store
            .seed_table(
                "t",
                &["id".to_string()],
                vec![
                    record(json!({ "id": 2, "v": "old", "gone": 1 })),
                    record(json!({ "id": 3, "v": "x" })),
                ],
            )
            .expect("seed");

        let mut plan = plan_against(
            &store,
            vec![
                ("001.json", json!({ "action": "create", "data": { "id": 1, "v": "a" } })),
                ("002.json", json!({ "action": "create", "data": { "id": 2, "v": "old" } })),
                ("003.json", json!({ "action": "create", "data": { "id": 3 } })),
                ("004.json", json!({ "action": "update", "data": { "id": 2, "v": "new", "gone": "" } })),
                ("005.json", json!({ "action": "delete", "data": { "id": 3 } })),
            ],
        );

        let summary = Executor::new(&store).apply(&mut plan).expect("apply");

        assert_eq!(summary.completed(), 3);
        assert!(plan.is_applied());

        let created = store.get("t", &id(1)).expect("created item");
        assert_eq!(created.get("v"), Some(&json!("a")));
        assert_eq!(
            created.get(META_FIELD),
            Some(&json!({ "ref_file": "001.json", "action": "create", "timestamp": ts().as_str() }))
        );

        let updated = store.get("t", &id(2)).expect("updated item");
        assert_eq!(updated.get("v"), Some(&json!("new")));
        assert!(!updated.contains_key("gone"));
        assert_eq!(updated.get(META_FIELD).and_then(|m| m.get("ref_file")), Some(&json!("004.json")));

        assert_eq!(store.get("t", &id(3)), None);
        for n in 1..=3 {
            assert_eq!(outcome_of(&plan, n), Some(ApplyResult::Completed));
        }
    }

    #[test]
    fn lost_create_race_is_not_completed() {
        let store = MemoryStore::new();
        let mut plan = plan_against(
            &store,
            vec![("001.json", json!({ "action": "create", "data": { "id": 1, "v": "mine" } }))],
        );

        // another run creates the row between plan and apply
        store
            .seed_table("t", &["id".to_string()], vec![record(json!({ "id": 1, "v": "theirs" }))])
            .expect("seed");

        let summary = Executor::new(&store).apply(&mut plan).expect("race loss is not an error");

        assert_eq!(summary.not_completed(), 1);
        assert_eq!(outcome_of(&plan, 1), Some(ApplyResult::NotCompleted));
        assert_eq!(
            store.get("t", &id(1)).and_then(|item| item.get("v").cloned()),
            Some(json!("theirs"))
        );
    }

    #[test]
    fn no_op_leaves_carry_no_outcome() {
        let store = MemoryStore::new();
        store
            .seed_table("t", &["id".to_string()], vec![record(json!({ "id": 1 }))])
            .expect("seed");
        let mut plan = plan_against(
            &store,
            vec![("001.json", json!({ "action": "create", "data": { "id": 1, "v": "a" } }))],
        );

        Executor::new(&store).apply(&mut plan).expect("apply");

        assert_eq!(outcome_of(&plan, 1), None);
        assert_eq!(store.get("t", &id(1)), Some(record(json!({ "id": 1 }))));
    }

    #[test]
    fn plan_cannot_be_applied_twice() {
        let store = MemoryStore::new();
        let mut plan = plan_against(
            &store,
            vec![("001.json", json!({ "action": "create", "data": { "id": 1 } }))],
        );

        Executor::new(&store).apply(&mut plan).expect("first apply");
        let err = Executor::new(&store)
            .apply(&mut plan)
            .expect_err("second apply should fail");

        assert_eq!(err.message, "plan has already been applied");
    }

    struct RejectingStore;

    impl Store for RejectingStore {
        fn get_consistent(&self, _: &ItemKey) -> Result<Option<Record>, StoreError> {
            Ok(None)
        }

        fn put_if_absent(&self, key: &ItemKey, _: Record) -> Result<bool, StoreError> {
            Err(StoreError::Request {
                table: key.table.clone(),
                key: key.key.to_string(),
                message: "access denied".to_string(),
            })
        }

        fn patch(&self, _: &ItemKey, _: &ItemPatch) -> Result<(), StoreError> {
            Ok(())
        }

        fn delete(&self, _: &ItemKey) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn store_write_failure_is_not_masked() {
        let mut plan = plan_against(
            &RejectingStore,
            vec![("001.json", json!({ "action": "create", "data": { "id": 1 } }))],
        );

        let err = Executor::new(&RejectingStore)
            .apply(&mut plan)
            .expect_err("write failure should propagate");

        assert_eq!(err.origin, ErrorOrigin::Apply);
        assert_eq!(err.message, "store request failed for t (1): access denied");
        assert!(!plan.is_applied());
    }

    struct FlakyDeleteStore {
        inner: MemoryStore,
        creates: Cell<usize>,
        fail_delete: Cell<bool>,
    }

    impl Store for FlakyDeleteStore {
        fn get_consistent(&self, key: &ItemKey) -> Result<Option<Record>, StoreError> {
            self.inner.get_consistent(key)
        }

        fn put_if_absent(&self, key: &ItemKey, item: Record) -> Result<bool, StoreError> {
            self.creates.set(self.creates.get() + 1);
            self.inner.put_if_absent(key, item)
        }

        fn patch(&self, key: &ItemKey, patch: &ItemPatch) -> Result<(), StoreError> {
            self.inner.patch(key, patch)
        }

        fn delete(&self, key: &ItemKey) -> Result<(), StoreError> {
            if self.fail_delete.replace(false) {
                return Err(StoreError::Unavailable {
                    message: "throttled".to_string(),
                });
            }
            self.inner.delete(key)
        }
    }

    #[test]
    fn apply_after_store_failure_resumes_without_rewriting() {
        let store = FlakyDeleteStore {
            inner: MemoryStore::new(),
            creates: Cell::new(0),
            fail_delete: Cell::new(true),
        };
        store
            .inner
            .seed_table("t", &["id".to_string()], vec![record(json!({ "id": 2 }))])
            .expect("seed");
        let mut plan = plan_against(
            &store,
            vec![
                ("001.json", json!({ "action": "create", "data": { "id": 1 } })),
                ("002.json", json!({ "action": "create", "data": { "id": 2 } })),
                ("003.json", json!({ "action": "delete", "data": { "id": 2 } })),
            ],
        );

        Executor::new(&store).apply(&mut plan).expect_err("delete should fail once");
        assert!(!plan.is_applied());
        assert_eq!(outcome_of(&plan, 1), Some(ApplyResult::Completed));
        assert_eq!(outcome_of(&plan, 2), None);

        let summary = Executor::new(&store).apply(&mut plan).expect("retry should finish");

        assert!(plan.is_applied());
        assert_eq!(summary.completed(), 2);
        assert_eq!(summary.not_completed(), 0);
        assert_eq!(store.creates.get(), 1);
        assert_eq!(store.inner.get("t", &id(2)), None);
    }
}
