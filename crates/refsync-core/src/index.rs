//! Composite-key index builder.
//!
//! Folds each table's change records, in file order, into one leaf per
//! composite key. Ordering rules enforced here:
//! - a key is created at most once per batch,
//! - update and delete require an earlier create,
//! - a delete is terminal; later updates of the same key are rejected.

use crate::{
    COMPARE_RESULT_FIELD, META_FIELD, RESULT_FIELD, RawBatch, RawTable, Record, SCHEMA_FIELD,
    apply::ApplyResult,
    config::RunTimestamp,
    error::{Error, ErrorOrigin, TableDataError},
    key::CompositeKey,
    plan::CompareResult,
    record::{Action, ChangeRecord, Meta},
    schema::TableSchema,
    store::ItemKey,
    validate::validate_table,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, btree_map::Entry};

///
/// LeafBody
///
/// Desired state of one key. Only live leaves carry non-key data.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LeafBody {
    Create { fields: Record },
    Update { fields: Record },
    Delete,
}

impl LeafBody {
    #[must_use]
    pub const fn action(&self) -> Action {
        match self {
            Self::Create { .. } => Action::Create,
            Self::Update { .. } => Action::Update,
            Self::Delete => Action::Delete,
        }
    }

    #[must_use]
    pub const fn fields(&self) -> Option<&Record> {
        match self {
            Self::Create { fields } | Self::Update { fields } => Some(fields),
            Self::Delete => None,
        }
    }

    pub(crate) const fn fields_mut(&mut self) -> Option<&mut Record> {
        match self {
            Self::Create { fields } | Self::Update { fields } => Some(fields),
            Self::Delete => None,
        }
    }
}

///
/// Leaf
///
/// The folded view of one composite key, plus the annotations the planner
/// and executor attach to it.
///

#[derive(Clone, Debug, PartialEq)]
pub struct Leaf {
    pub key: CompositeKey,
    /// Key field name → value, exactly as the creating record spelled them.
    pub key_fields: Record,
    pub body: LeafBody,
    pub ref_file: String,
    pub timestamp: RunTimestamp,
    pub compare: Option<CompareResult>,
    pub outcome: Option<ApplyResult>,
}

impl Leaf {
    #[must_use]
    pub const fn action(&self) -> Action {
        self.body.action()
    }

    #[must_use]
    pub fn meta(&self) -> Meta {
        Meta {
            ref_file: self.ref_file.clone(),
            action: self.action(),
            timestamp: self.timestamp.clone(),
        }
    }

    /// The desired item without `_meta`: key fields plus any live data.
    #[must_use]
    pub fn desired(&self) -> Record {
        let mut item = self.key_fields.clone();
        if let Some(fields) = self.body.fields() {
            item.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        item
    }

    /// The full item a create writes: desired fields plus `_meta`.
    #[must_use]
    pub fn to_item(&self) -> Record {
        let mut item = self.desired();
        item.insert(META_FIELD.to_string(), self.meta().to_json());

        item
    }

    /// Address this leaf in a store table using its expanded key field values.
    #[must_use]
    pub fn item_key(&self, store_table: &str, keys: &[String]) -> ItemKey {
        let key =
            CompositeKey::from_record(&self.key_fields, keys).unwrap_or_else(|_| self.key.clone());

        ItemKey {
            table: store_table.to_string(),
            key,
            fields: self.key_fields.clone(),
        }
    }

    /// Render the leaf with every annotation present so far.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut item = self.to_item();
        if let Some(compare) = &self.compare {
            item.insert(COMPARE_RESULT_FIELD.to_string(), compare.to_json());
        }
        if let Some(outcome) = self.outcome {
            item.insert(RESULT_FIELD.to_string(), Value::from(outcome.as_str()));
        }

        Value::Object(item)
    }
}

///
/// TableIndex
///

#[derive(Clone, Debug, PartialEq)]
pub struct TableIndex {
    /// Source directory the table was read from.
    pub dir: String,
    pub schema: TableSchema,
    pub leaves: BTreeMap<CompositeKey, Leaf>,
    /// Tree label path of every key; labels must identify one key.
    labels: BTreeSet<Vec<String>>,
}

impl TableIndex {
    #[must_use]
    pub const fn new(dir: String, schema: TableSchema) -> Self {
        Self {
            dir,
            schema,
            leaves: BTreeMap::new(),
            labels: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &CompositeKey) -> Option<&Leaf> {
        self.leaves.get(key)
    }

    /// Fold one validated change record into the index.
    pub fn fold(
        &mut self,
        file: &str,
        record: ChangeRecord,
        timestamp: &RunTimestamp,
    ) -> Result<(), TableDataError> {
        let ChangeRecord { action, key, data } = record;
        let (key_fields, fields): (Record, Record) = data
            .into_iter()
            .partition(|(field, _)| self.schema.is_key_field(field));

        match action {
            Action::Create => match self.leaves.entry(key) {
                Entry::Occupied(_) => Err(TableDataError::KeysSeenBefore {
                    file: file.to_string(),
                    table: self.dir.clone(),
                }),
                Entry::Vacant(slot) => {
                    // 1 and "1" are distinct keys but share a tree label
                    if !self.labels.insert(tree_labels(slot.key())) {
                        return Err(TableDataError::AmbiguousKey {
                            file: file.to_string(),
                            table: self.dir.clone(),
                            key: slot.key().to_string(),
                        });
                    }
                    let key = slot.key().clone();
                    slot.insert(Leaf {
                        key,
                        key_fields,
                        body: LeafBody::Create { fields },
                        ref_file: file.to_string(),
                        timestamp: timestamp.clone(),
                        compare: None,
                        outcome: None,
                    });

                    Ok(())
                }
            },

            Action::Update => {
                let Some(leaf) = self.leaves.get_mut(&key) else {
                    return Err(keys_not_seen(file, &self.dir, action));
                };
                let Some(existing) = leaf.body.fields_mut() else {
                    return Err(TableDataError::PreviouslyDeleted {
                        file: file.to_string(),
                        table: self.dir.clone(),
                    });
                };

                // partial patch: absent fields keep their earlier values
                existing.extend(fields);
                let merged = std::mem::take(existing);
                leaf.body = LeafBody::Update { fields: merged };
                leaf.ref_file = file.to_string();
                leaf.timestamp = timestamp.clone();

                Ok(())
            }

            Action::Delete => {
                let Some(leaf) = self.leaves.get_mut(&key) else {
                    return Err(keys_not_seen(file, &self.dir, action));
                };
                leaf.body = LeafBody::Delete;
                leaf.ref_file = file.to_string();
                leaf.timestamp = timestamp.clone();

                Ok(())
            }
        }
    }

    /// Render the nested tree: `_schema` at the root, then one object level
    /// per key field, with annotated leaves at the bottom.
    #[must_use]
    pub fn to_tree(&self) -> Value {
        let mut root = Record::new();
        root.insert(
            SCHEMA_FIELD.to_string(),
            serde_json::json!({ "table": self.schema.table, "keys": self.schema.keys }),
        );

        for leaf in self.leaves.values() {
            let mut level = &mut root;
            let mut parts = (&leaf.key).into_iter().peekable();
            while let Some(part) = parts.next() {
                let label = part.to_string();
                if parts.peek().is_none() {
                    level.insert(label, leaf.to_json());
                    break;
                }

                let next = level
                    .entry(label)
                    .or_insert_with(|| Value::Object(Record::new()));
                let Value::Object(next) = next else {
                    break;
                };
                level = next;
            }
        }

        Value::Object(root)
    }
}

fn tree_labels(key: &CompositeKey) -> Vec<String> {
    key.iter().map(ToString::to_string).collect()
}

fn keys_not_seen(file: &str, dir: &str, action: Action) -> TableDataError {
    TableDataError::KeysNotSeen {
        file: file.to_string(),
        table: dir.to_string(),
        action: action.as_str(),
    }
}

///
/// BatchIndex
///
/// Every table of one batch, keyed by schema table name.
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchIndex {
    pub tables: BTreeMap<String, TableIndex>,
}

impl BatchIndex {
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableIndex> {
        self.tables.get(name)
    }

    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.tables.values().map(|table| table.leaves.len()).sum()
    }

    pub fn leaves(&self) -> impl Iterator<Item = (&TableIndex, &Leaf)> {
        self.tables
            .values()
            .flat_map(|table| table.leaves.values().map(move |leaf| (table, leaf)))
    }

    /// Render every table tree under its table name.
    #[must_use]
    pub fn to_tree(&self) -> Value {
        Value::Object(
            self.tables
                .iter()
                .map(|(name, table)| (name.clone(), table.to_tree()))
                .collect(),
        )
    }
}

///
/// IndexBuilder
///

#[derive(Clone, Copy, Debug)]
pub struct IndexBuilder<'a> {
    timestamp: &'a RunTimestamp,
}

impl<'a> IndexBuilder<'a> {
    #[must_use]
    pub const fn new(timestamp: &'a RunTimestamp) -> Self {
        Self { timestamp }
    }

    /// Validate and fold every table of a raw batch.
    ///
    /// Aborts on the first violation; nothing from later tables is indexed.
    pub fn build(&self, raw: &RawBatch) -> Result<BatchIndex, Error> {
        let mut batch = BatchIndex::default();

        for (dir, files) in raw {
            let Some(table) = self.build_table(dir, files)? else {
                tracing::warn!(dir = %dir, "skipping empty table directory");
                continue;
            };

            match batch.tables.entry(table.schema.table.clone()) {
                Entry::Occupied(existing) => {
                    return Err(Error::malformed(
                        ErrorOrigin::Index,
                        TableDataError::DuplicateTable {
                            name: table.schema.table,
                            first: existing.get().dir.clone(),
                            second: table.dir,
                        },
                    ));
                }
                Entry::Vacant(slot) => {
                    tracing::info!(
                        table = %table.schema.table,
                        dir = %dir,
                        leaves = table.leaves.len(),
                        "indexed table"
                    );
                    slot.insert(table);
                }
            }
        }

        Ok(batch)
    }

    /// Validate and fold one table directory. `None` for an empty directory.
    pub fn build_table(&self, dir: &str, files: &RawTable) -> Result<Option<TableIndex>, Error> {
        let Some(records) = validate_table(dir, files)? else {
            return Ok(None);
        };

        let mut table = TableIndex::new(dir.to_string(), records.schema().clone());
        for record in records {
            let (file, record) = record?;
            tracing::debug!(table = %dir, file, action = %record.action, key = %record.key, "folding record");
            table
                .fold(file, record, self.timestamp)
                .map_err(|err| Error::malformed(ErrorOrigin::Index, err))?;
        }

        Ok(Some(table))
    }
}

///
/// TESTS
///
