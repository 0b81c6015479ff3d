//! # refsync
//!
//! Reconcile a directory of per-table change files against a key-value
//! store snapshot.
//!
//! ```text
//! refsync data/ --env dev --store store.json            # report
//! refsync data/ --env dev --store store.json --mode commit
//! refsync data/ --params mode=report,env=dev
//! ```
//!
//! The annotated tree goes to `--output` (or stdout); the summary goes to
//! stderr. Logging honours `RUST_LOG`.

#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod load;

#[cfg(test)]
pub(crate) mod test_support;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use refsync_core::prelude::*;
use std::path::PathBuf;

///
/// Cli
///

#[derive(Debug, Parser)]
#[command(name = "refsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding one subdirectory of change files per table.
    pub dir: PathBuf,

    /// Environment prefix for store table names.
    #[arg(long)]
    pub env: Option<String>,

    /// Report plans only; commit also applies them.
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Pipeline parameter string, e.g. `mode=commit,env=dev`.
    #[arg(long, conflicts_with_all = ["env", "mode"])]
    pub params: Option<String>,

    /// JSON store snapshot to plan against; rewritten in commit mode.
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Run timestamp to use instead of the current time.
    #[arg(long)]
    pub timestamp: Option<String>,

    /// Write the annotated tree here instead of stdout.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

impl Cli {
    /// Resolve the run configuration from flags or the parameter string.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameter string is malformed.
    pub fn config(&self) -> Result<SyncConfig> {
        if let Some(params) = &self.params {
            return Ok(SyncConfig::from_user_parameters(params)?);
        }

        Ok(SyncConfig {
            env_prefix: self.env.clone(),
            mode: self.mode.map(RunMode::from).unwrap_or_default(),
            ..SyncConfig::default()
        })
    }

    /// Resolve the run timestamp, reading the clock only when none was given.
    ///
    /// # Errors
    ///
    /// Returns an error if the current time cannot be formatted.
    pub fn timestamp(&self) -> Result<RunTimestamp> {
        match &self.timestamp {
            Some(ts) => Ok(RunTimestamp::fixed(ts.clone())),
            None => Ok(RunTimestamp::now_utc()?),
        }
    }
}

///
/// Mode
///

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Mode {
    Report,
    Commit,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Report => Self::Report,
            Mode::Commit => Self::Commit,
        }
    }
}

/// Run one reconciliation.
///
/// # Errors
///
/// Returns an error on unreadable input, malformed table data, or a store
/// failure. Nothing is written back when any phase fails.
pub fn execute(cli: &Cli) -> Result<PlanSummary> {
    let reconciler = Reconciler::new(cli.config()?, cli.timestamp()?);
    let raw = load::read_batch(&cli.dir)?;
    let batch = reconciler.index(&raw)?;

    let store = MemoryStore::new();
    let untouched = match &cli.store {
        Some(path) => {
            let snapshot = load::read_snapshot(path)?;
            load::seed_store(&store, snapshot, &batch, reconciler.config())?
        }
        None => load::Snapshot::new(),
    };

    let mut plan = reconciler.plan(batch, &store)?;
    if reconciler.config().mode == RunMode::Commit {
        reconciler.apply(&mut plan, &store)?;
        if let Some(path) = &cli.store {
            load::write_snapshot(path, &store, untouched)?;
        }
    }

    let tree = plan.to_tree();
    match &cli.output {
        Some(path) => load::write_json(path, &tree)?,
        None => println!(
            "{}",
            serde_json::to_string_pretty(&tree).context("failed to render tree")?
        ),
    }

    Ok(plan.summary())
}

///
/// TESTS
///
