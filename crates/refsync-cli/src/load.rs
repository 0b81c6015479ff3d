//! Filesystem collaborators: the batch directory reader and the JSON store
//! snapshot.

use anyhow::{Context, Result};
use refsync_core::{
    RawBatch, RawTable, Record, config::SyncConfig, index::BatchIndex, store::MemoryStore,
};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

/// Store table name → items.
pub type Snapshot = BTreeMap<String, Vec<Record>>;

/// Read one subdirectory per table, one parsed JSON value per `*.json` file.
///
/// Entries whose name starts with `.` are ignored.
///
/// # Errors
///
/// Returns an error if a directory cannot be listed or a file is not valid JSON.
pub fn read_batch(dir: &Path) -> Result<RawBatch> {
    let mut batch = RawBatch::new();

    for (name, path) in visible_entries(dir)? {
        if !path.is_dir() {
            tracing::debug!(path = %path.display(), "skipping non-directory entry");
            continue;
        }
        batch.insert(name, read_table(&path)?);
    }

    Ok(batch)
}

fn read_table(dir: &Path) -> Result<RawTable> {
    let mut table = RawTable::new();

    for (name, path) in visible_entries(dir)? {
        if !path.is_file() || path.extension().is_none_or(|ext| ext != "json") {
            tracing::debug!(path = %path.display(), "skipping non-json entry");
            continue;
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        table.insert(name, value);
    }

    Ok(table)
}

fn visible_entries(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut entries = Vec::new();

    for entry in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        let Ok(name) = entry.file_name().into_string() else {
            tracing::warn!(path = %entry.path().display(), "skipping entry with non-UTF-8 name");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        entries.push((name, entry.path()));
    }

    Ok(entries)
}

/// Read a store snapshot file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a snapshot object.
pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read store snapshot {}", path.display()))?;

    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse store snapshot {}", path.display()))
}

/// Seed `store` with every snapshot table the batch references.
///
/// Returns the snapshot tables the batch does not reference, so they can be
/// written back unchanged.
///
/// # Errors
///
/// Returns an error if a snapshot item lacks a key field of its table.
pub fn seed_store(
    store: &MemoryStore,
    mut snapshot: Snapshot,
    batch: &BatchIndex,
    config: &SyncConfig,
) -> Result<Snapshot> {
    for table in batch.tables.values() {
        let store_table = config.store_table(&table.schema.table);
        let Some(items) = snapshot.remove(&store_table) else {
            continue;
        };

        tracing::debug!(table = %store_table, items = items.len(), "seeding store table");
        store.seed_table(&store_table, &table.schema.keys, items)?;
    }

    Ok(snapshot)
}

/// Write the store contents, plus untouched tables, back to a snapshot file.
///
/// # Errors
///
/// Returns an error if the store cannot be read or the file cannot be written.
pub fn write_snapshot(path: &Path, store: &MemoryStore, untouched: Snapshot) -> Result<()> {
    let mut snapshot = untouched;
    snapshot.extend(store.snapshot()?);

    write_json(path, &serde_json::to_value(&snapshot)?)
}

/// Pretty-print a JSON value to a file.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_json(path: &Path, value: &Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;

    fs::write(path, rendered + "\n").with_context(|| format!("failed to write {}", path.display()))
}

///
/// TESTS
///
