use crate::store::StoreError;
use std::fmt;
use thiserror::Error as ThisError;

///
/// Error
///
/// Structured engine error with a stable classification.
/// Validation failures carry a [`TableDataError`]; store failures carry the
/// collaborator's [`StoreError`] untouched.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct Error {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,

    /// Optional structured error detail.
    /// The variant (if present) must correspond to `class`.
    pub detail: Option<ErrorDetail>,
}

impl Error {
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
            detail: None,
        }
    }

    /// Construct a malformed-table-data error raised during schema or record validation.
    pub(crate) fn malformed(origin: ErrorOrigin, err: TableDataError) -> Self {
        Self {
            class: ErrorClass::MalformedTableData,
            origin,
            message: err.to_string(),
            detail: Some(ErrorDetail::Table(err)),
        }
    }

    /// Wrap a store failure raised while planning or applying.
    pub(crate) fn store(origin: ErrorOrigin, err: StoreError) -> Self {
        Self {
            class: ErrorClass::Store,
            origin,
            message: err.to_string(),
            detail: Some(ErrorDetail::Store(err)),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Config, ErrorOrigin::Config, message)
    }

    pub(crate) fn invariant(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::InvariantViolation, origin, message)
    }

    #[must_use]
    pub const fn is_malformed_table_data(&self) -> bool {
        matches!(self.class, ErrorClass::MalformedTableData)
    }

    /// Return the structured validation failure, if this is one.
    #[must_use]
    pub const fn table_data_error(&self) -> Option<&TableDataError> {
        match &self.detail {
            Some(ErrorDetail::Table(err)) => Some(err),
            _ => None,
        }
    }

    /// Return the store collaborator's error, if this is one.
    #[must_use]
    pub const fn store_error(&self) -> Option<&StoreError> {
        match &self.detail {
            Some(ErrorDetail::Store(err)) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

///
/// ErrorDetail
///

#[derive(Debug, ThisError)]
pub enum ErrorDetail {
    #[error("{0}")]
    Table(TableDataError),
    #[error("{0}")]
    Store(StoreError),
}

///
/// TableDataError
///
/// Validation failures for one table's change files.
/// Every variant names the table directory and, where one is involved, the file.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum TableDataError {
    #[error("schema file is missing for this table: {table}")]
    MissingSchema { table: String },

    #[error(
        "keys attribute in schema is length 0 for table {table}, expecting at least one element"
    )]
    EmptyKeys { table: String },

    #[error("schema file for {table} does not contain table name or keys attribute")]
    IncompleteSchema { table: String },

    #[error("record file {file} for table {table} does not contain action and data attribute")]
    MissingActionOrData { file: String, table: String },

    #[error("one or more key fields are missing in record file {file} for table {table}")]
    MissingKeyFields { file: String, table: String },

    #[error("key field '{field}' in record file {file} for table {table} is not a scalar value")]
    NonScalarKey {
        file: String,
        table: String,
        field: String,
    },

    #[error("action value '{action}' is unknown in record file {file} for table {table}")]
    UnknownAction {
        file: String,
        table: String,
        action: String,
    },

    #[error(
        "check record file {file} for table {table} as action is 'create' but keys have been seen before"
    )]
    KeysSeenBefore { file: String, table: String },

    #[error(
        "check record file {file} for table {table} as action is '{action}' but keys have not been seen before"
    )]
    KeysNotSeen {
        file: String,
        table: String,
        action: &'static str,
    },

    #[error(
        "check record file {file} for table {table} as action is update but record has previously been deleted"
    )]
    PreviouslyDeleted { file: String, table: String },

    #[error(
        "check record file {file} for table {table} as keys {key} render the same as keys of a different type seen before"
    )]
    AmbiguousKey {
        file: String,
        table: String,
        key: String,
    },

    #[error("table name '{name}' is declared by both {first} and {second}")]
    DuplicateTable {
        name: String,
        first: String,
        second: String,
    },
}

///
/// ErrorClass
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    MalformedTableData,
    Store,
    Config,
    InvariantViolation,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::MalformedTableData => "malformed_table_data",
            Self::Store => "store",
            Self::Config => "config",
            Self::InvariantViolation => "invariant_violation",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Validate,
    Index,
    Plan,
    Apply,
    Store,
    Config,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Validate => "validate",
            Self::Index => "index",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Store => "store",
            Self::Config => "config",
        };
        write!(f, "{label}")
    }
}
