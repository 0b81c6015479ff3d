use crate::{
    RawBatch,
    apply::Executor,
    config::{RunMode, RunTimestamp, SyncConfig},
    error::Error,
    expand::Expander,
    index::{BatchIndex, IndexBuilder},
    plan::{Plan, Planner},
    store::Store,
    summary::PlanSummary,
};

///
/// Reconciler
///
/// One reconciliation run: a config plus the timestamp captured when the run
/// started. Every phase of the run sees the same timestamp.
///

#[derive(Clone, Debug)]
pub struct Reconciler {
    config: SyncConfig,
    timestamp: RunTimestamp,
}

impl Reconciler {
    #[must_use]
    pub const fn new(config: SyncConfig, timestamp: RunTimestamp) -> Self {
        Self { config, timestamp }
    }

    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub const fn timestamp(&self) -> &RunTimestamp {
        &self.timestamp
    }

    /// Validate, fold and expand a raw batch.
    pub fn index(&self, raw: &RawBatch) -> Result<BatchIndex, Error> {
        let mut batch = IndexBuilder::new(&self.timestamp).build(raw)?;
        Expander::new(&self.config.sentinel, &self.timestamp).expand_batch(&mut batch);

        tracing::info!(
            tables = batch.tables.len(),
            leaves = batch.leaf_count(),
            timestamp = %self.timestamp,
            "indexed batch"
        );

        Ok(batch)
    }

    pub fn plan<S: Store + ?Sized>(&self, batch: BatchIndex, store: &S) -> Result<Plan, Error> {
        let plan = Planner::new(&self.config, store).plan(batch)?;

        let planned = plan.summary().planned();
        tracing::info!(
            create = planned.create,
            update = planned.update,
            delete = planned.delete,
            none = planned.none,
            "planned batch"
        );

        Ok(plan)
    }

    pub fn apply<S: Store + ?Sized>(&self, plan: &mut Plan, store: &S) -> Result<PlanSummary, Error> {
        Executor::new(store).apply(plan)
    }

    /// Index and plan a batch, then apply it when running in commit mode.
    pub fn run<S: Store + ?Sized>(&self, raw: &RawBatch, store: &S) -> Result<Plan, Error> {
        let batch = self.index(raw)?;
        let mut plan = self.plan(batch, store)?;

        match self.config.mode {
            RunMode::Report => {
                tracing::info!("report mode, store left untouched");
            }
            RunMode::Commit => {
                self.apply(&mut plan, store)?;
            }
        }

        Ok(plan)
    }
}
