use crate::{
    apply::ApplyResult,
    config::SyncConfig,
    index::{BatchIndex, TableIndex},
    plan::PlannedAction,
    record::Action,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

///
/// ActionCounts
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ActionCounts {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub none: usize,
}

impl ActionCounts {
    const fn record_requested(&mut self, action: Action) {
        match action {
            Action::Create => self.create += 1,
            Action::Update => self.update += 1,
            Action::Delete => self.delete += 1,
        }
    }

    const fn record_planned(&mut self, action: PlannedAction) {
        match action {
            PlannedAction::Create => self.create += 1,
            PlannedAction::Update => self.update += 1,
            PlannedAction::Delete => self.delete += 1,
            PlannedAction::None => self.none += 1,
        }
    }

    /// Number of store mutations these counts describe.
    #[must_use]
    pub const fn mutations(&self) -> usize {
        self.create + self.update + self.delete
    }

    fn merge(&mut self, other: &Self) {
        self.create += other.create;
        self.update += other.update;
        self.delete += other.delete;
        self.none += other.none;
    }
}

///
/// TableSummary
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TableSummary {
    pub store_table: String,
    pub leaves: usize,
    pub requested: ActionCounts,
    pub planned: ActionCounts,
    pub completed: usize,
    pub not_completed: usize,
}

impl TableSummary {
    fn collect(store_table: String, table: &TableIndex) -> Self {
        let mut summary = Self {
            store_table,
            leaves: table.leaves.len(),
            ..Self::default()
        };

        for leaf in table.leaves.values() {
            summary.requested.record_requested(leaf.action());
            if let Some(compare) = &leaf.compare {
                summary.planned.record_planned(compare.action);
            }
            match leaf.outcome {
                Some(ApplyResult::Completed) => summary.completed += 1,
                Some(ApplyResult::NotCompleted) => summary.not_completed += 1,
                None => {}
            }
        }

        summary
    }
}

///
/// PlanSummary
///
/// Per-table counts for notification and CLI output, keyed by schema table.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PlanSummary {
    pub tables: BTreeMap<String, TableSummary>,
}

impl PlanSummary {
    #[must_use]
    pub fn collect(batch: &BatchIndex, config: &SyncConfig) -> Self {
        let tables = batch
            .tables
            .iter()
            .map(|(name, table)| {
                let summary = TableSummary::collect(config.store_table(name), table);
                (name.clone(), summary)
            })
            .collect();

        Self { tables }
    }

    #[must_use]
    pub fn planned(&self) -> ActionCounts {
        let mut total = ActionCounts::default();
        for table in self.tables.values() {
            total.merge(&table.planned);
        }

        total
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        self.tables.values().map(|table| table.completed).sum()
    }

    #[must_use]
    pub fn not_completed(&self) -> usize {
        self.tables.values().map(|table| table.not_completed).sum()
    }

    /// Whether any leaf needs a store mutation.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.planned().mutations() > 0
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, table) in &self.tables {
            let planned = &table.planned;
            writeln!(
                f,
                "{name} ({}): {} leaves, create {} update {} delete {} none {}, completed {} not_completed {}",
                table.store_table,
                table.leaves,
                planned.create,
                planned.update,
                planned.delete,
                planned.none,
                table.completed,
                table.not_completed,
            )?;
        }

        Ok(())
    }
}

///
/// TESTS
///
