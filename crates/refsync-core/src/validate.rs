//! Schema and record validation for one table directory.
//!
//! Validation is fail-fast and lazy: the schema is checked up front, then
//! each change file is checked only when the index builder pulls it. The
//! first violation in file order is the one reported.

use crate::{
    RawTable,
    error::{Error, ErrorOrigin, TableDataError},
    record::ChangeRecord,
    schema::TableSchema,
};
use serde_json::Value;
use std::collections::btree_map;

///
/// TableRecords
///
/// A table whose schema has been validated, yielding its change records in
/// lexical file order.
///

pub struct TableRecords<'a> {
    dir: &'a str,
    schema: TableSchema,
    files: btree_map::Iter<'a, String, Value>,
}

impl<'a> TableRecords<'a> {
    #[must_use]
    pub const fn schema(&self) -> &TableSchema {
        &self.schema
    }

    #[must_use]
    pub const fn dir(&self) -> &'a str {
        self.dir
    }
}

impl<'a> Iterator for TableRecords<'a> {
    type Item = Result<(&'a str, ChangeRecord), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let (file, raw) = self.files.next()?;
        let record = ChangeRecord::from_json(self.dir, file, raw, &self.schema)
            .map(|record| (file.as_str(), record))
            .map_err(|err| Error::malformed(ErrorOrigin::Validate, err));

        Some(record)
    }
}

/// Validate the schema file of one table directory.
///
/// Returns `None` for an empty directory. The lexically-first file is the
/// schema; a change record sorting first means the schema file is missing.
pub fn validate_table<'a>(
    dir: &'a str,
    files: &'a RawTable,
) -> Result<Option<TableRecords<'a>>, Error> {
    let mut iter = files.iter();
    let Some((_, raw_schema)) = iter.next() else {
        return Ok(None);
    };

    if is_change_record(raw_schema) {
        return Err(Error::malformed(
            ErrorOrigin::Validate,
            TableDataError::MissingSchema {
                table: dir.to_string(),
            },
        ));
    }

    let schema = TableSchema::from_json(dir, raw_schema)
        .map_err(|err| Error::malformed(ErrorOrigin::Validate, err))?;

    Ok(Some(TableRecords {
        dir,
        schema,
        files: iter,
    }))
}

fn is_change_record(raw: &Value) -> bool {
    raw.get("table").is_none() && (raw.get("action").is_some() || raw.get("data").is_some())
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{record::Action, test_support::raw_table};
    use serde_json::json;

    #[test]
    fn empty_directory_yields_no_table() {
        let files = RawTable::new();

        assert!(
            validate_table("test", &files)
                .expect("empty table is not an error")
                .is_none()
        );
    }

    #[test]
    fn records_are_yielded_in_file_order_after_schema() {
        let files = raw_table([
            ("002_update.json", json!({ "action": "update", "data": { "id": 1 } })),
            ("000_schema.json", json!({ "table": "t", "keys": ["id"] })),
            ("001_create.json", json!({ "action": "create", "data": { "id": 1 } })),
        ]);

        let records = validate_table("t", &files)
            .expect("schema should validate")
            .expect("table is not empty");
        assert_eq!(records.schema().table, "t");

        let order = records
            .map(|record| record.map(|(file, record)| (file.to_string(), record.action)))
            .collect::<Result<Vec<_>, _>>()
            .expect("records should validate");
        assert_eq!(
            order,
            vec![
                ("001_create.json".to_string(), Action::Create),
                ("002_update.json".to_string(), Action::Update),
            ]
        );
    }

    #[test]
    fn change_record_sorting_first_means_schema_is_missing() {
        let files = raw_table([
            ("00_create.json", json!({ "action": "create", "data": { "id": 1 } })),
            ("01_schema.json", json!({ "table": "t", "keys": ["id"] })),
        ]);

        let err = validate_table("t", &files)
            .err()
            .expect("schema must sort first");
        assert_eq!(err.message, "schema file is missing for this table: t");
    }

    #[test]
    fn first_invalid_record_ends_validation() {
        let files = raw_table([
            ("000_schema.json", json!({ "table": "t", "keys": ["id"] })),
            ("001.json", json!({ "action": "create", "data": { "val": 1 } })),
            ("002.json", json!({ "action": "nope", "data": { "id": 1 } })),
        ]);

        let err = validate_table("t", &files)
            .expect("schema should validate")
            .expect("table is not empty")
            .collect::<Result<Vec<_>, _>>()
            .expect_err("first record is invalid");
        assert!(err.is_malformed_table_data());
        assert_eq!(
            err.table_data_error(),
            Some(&TableDataError::MissingKeyFields {
                file: "001.json".to_string(),
                table: "t".to_string(),
            })
        );
    }
}
