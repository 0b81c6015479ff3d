//! Store boundary.
//!
//! The engine talks to the authoritative key-value store only through
//! [`Store`]. Each call is one atomic request from the store's point of view;
//! the engine issues at most one read per leaf while planning and at most one
//! write per leaf while applying.

use crate::{
    META_FIELD, Record,
    error::{Error, ErrorOrigin},
    key::CompositeKey,
    record::Meta,
};
use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};
use thiserror::Error as ThisError;

///
/// StoreError
///
/// Failure reported by a store client. Carried through the engine unmodified.
///

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    #[error("store request failed for {table} {key}: {message}")]
    Request {
        table: String,
        key: String,
        message: String,
    },
}

///
/// ItemKey
///
/// Addresses one stored item: the store table plus the key fields a client
/// sends on the wire.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ItemKey {
    pub table: String,
    pub key: CompositeKey,
    pub fields: Record,
}

///
/// ItemPatch
///
/// Attribute-level update: upsert `set`, delete `remove`, overwrite `_meta`.
///

#[derive(Clone, Debug, PartialEq)]
pub struct ItemPatch {
    pub set: Record,
    pub remove: Vec<String>,
    pub meta: Meta,
}

///
/// Store
///

pub trait Store {
    /// Strongly consistent read of the current item.
    fn get_consistent(&self, key: &ItemKey) -> Result<Option<Record>, StoreError>;

    /// Write `item` only if no item exists for `key`.
    ///
    /// Returns `false` when the condition failed, i.e. another writer won.
    fn put_if_absent(&self, key: &ItemKey, item: Record) -> Result<bool, StoreError>;

    /// Apply an attribute-level patch with no precondition.
    fn patch(&self, key: &ItemKey, patch: &ItemPatch) -> Result<(), StoreError>;

    /// Remove the item. Removing an absent item is not an error.
    fn delete(&self, key: &ItemKey) -> Result<(), StoreError>;
}

///
/// MemoryStore
///
/// In-process store with real conditional-create semantics.
/// Safe to share across threads; every call holds the lock for its duration.
///

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<String, BTreeMap<CompositeKey, Record>>>,
}

type Tables = BTreeMap<String, BTreeMap<CompositeKey, Record>>;

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Unavailable {
            message: "memory store lock poisoned".to_string(),
        })
    }

    /// Load existing items into a store table, keyed by `keys`.
    pub fn seed_table(&self, table: &str, keys: &[String], items: Vec<Record>) -> Result<(), Error> {
        let mut tables = self.lock().map_err(|err| Error::store(ErrorOrigin::Store, err))?;
        let rows = tables.entry(table.to_string()).or_default();

        for (position, item) in items.into_iter().enumerate() {
            let key = CompositeKey::from_record(&item, keys).map_err(|_| {
                Error::invariant(
                    ErrorOrigin::Store,
                    format!("seed item {position} for store table {table} lacks a scalar key field"),
                )
            })?;
            rows.insert(key, item);
        }

        Ok(())
    }

    /// Current item for a key, if any.
    #[must_use]
    pub fn get(&self, table: &str, key: &CompositeKey) -> Option<Record> {
        self.lock()
            .ok()
            .and_then(|tables| tables.get(table).and_then(|rows| rows.get(key)).cloned())
    }

    /// Number of items held in a store table.
    #[must_use]
    pub fn len(&self, table: &str) -> usize {
        self.lock()
            .map(|tables| tables.get(table).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Export every table as a list of items in key order.
    pub fn snapshot(&self) -> Result<BTreeMap<String, Vec<Record>>, StoreError> {
        let tables = self.lock()?;

        Ok(tables
            .iter()
            .map(|(name, rows)| (name.clone(), rows.values().cloned().collect()))
            .collect())
    }
}

impl Store for MemoryStore {
    fn get_consistent(&self, key: &ItemKey) -> Result<Option<Record>, StoreError> {
        let tables = self.lock()?;

        Ok(tables
            .get(&key.table)
            .and_then(|rows| rows.get(&key.key))
            .cloned())
    }

    fn put_if_absent(&self, key: &ItemKey, item: Record) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        let rows = tables.entry(key.table.clone()).or_default();
        if rows.contains_key(&key.key) {
            return Ok(false);
        }
        rows.insert(key.key.clone(), item);

        Ok(true)
    }

    fn patch(&self, key: &ItemKey, patch: &ItemPatch) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let item = tables
            .entry(key.table.clone())
            .or_default()
            .entry(key.key.clone())
            .or_insert_with(|| key.fields.clone());

        for (field, value) in &patch.set {
            item.insert(field.clone(), value.clone());
        }
        for field in &patch.remove {
            item.remove(field);
        }
        item.insert(META_FIELD.to_string(), patch.meta.to_json());

        Ok(())
    }

    fn delete(&self, key: &ItemKey) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if let Some(rows) = tables.get_mut(&key.table) {
            rows.remove(&key.key);
        }

        Ok(())
    }
}

///
/// TESTS
///
