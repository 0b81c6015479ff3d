//! Run configuration and the injected run clock.
//!
//! Nothing in the engine reads the wall clock. A [`RunTimestamp`] is captured
//! once by the caller and threaded through indexing and expansion, so two runs
//! over the same batch with the same timestamp produce identical trees.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};

///
/// CONSTANTS
///

/// Placeholder replaced by the run timestamp during expansion.
pub const DEFAULT_SENTINEL: &str = "%NOW%";

const RUN_TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]");

///
/// RunMode
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Plan only; the store is read but never written.
    #[default]
    Report,
    /// Plan, then apply every planned mutation.
    Commit,
}

impl RunMode {
    fn parse(raw: &str) -> Result<Self, Error> {
        match raw {
            "report" => Ok(Self::Report),
            "commit" => Ok(Self::Commit),
            other => Err(Error::config(format!("unknown mode '{other}'"))),
        }
    }
}

///
/// VolatileFields
///
/// Fields whose change alone never counts as a difference.
/// Names are matched case-insensitively.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct VolatileFields {
    pub created: String,
    pub modified: String,
}

impl VolatileFields {
    #[must_use]
    pub fn is_created(&self, field: &str) -> bool {
        field.eq_ignore_ascii_case(&self.created)
    }

    #[must_use]
    pub fn is_modified(&self, field: &str) -> bool {
        field.eq_ignore_ascii_case(&self.modified)
    }

    #[must_use]
    pub fn is_volatile(&self, field: &str) -> bool {
        self.is_created(field) || self.is_modified(field)
    }
}

impl Default for VolatileFields {
    fn default() -> Self {
        Self {
            created: "dt_created".to_string(),
            modified: "dt_modified".to_string(),
        }
    }
}

///
/// SyncConfig
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Environment prefix; store tables are named `{env}_{table}` when set.
    pub env_prefix: Option<String>,
    pub mode: RunMode,
    pub sentinel: String,
    pub volatile: VolatileFields,
}

impl SyncConfig {
    /// Parse a `key=value,key=value` parameter string.
    ///
    /// `mode` and `env` are required. Other keys are accepted and ignored.
    pub fn from_user_parameters(raw: &str) -> Result<Self, Error> {
        let mut mode = None;
        let mut env = None;

        for pair in raw.split(',') {
            let mut parts = pair.split('=');
            let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(Error::config(format!("this is an invalid parameter {pair}")));
            };

            match key {
                "mode" => mode = Some(RunMode::parse(value)?),
                "env" => env = Some(value.to_string()),
                other => tracing::debug!(parameter = other, "ignoring user parameter"),
            }
        }

        let mode = mode.ok_or_else(|| Error::config("mode not specified"))?;
        let env = env.ok_or_else(|| Error::config("env not specified"))?;

        Ok(Self {
            env_prefix: Some(env),
            mode,
            ..Self::default()
        })
    }

    /// Resolve the store table name for a schema table.
    #[must_use]
    pub fn store_table(&self, table: &str) -> String {
        match &self.env_prefix {
            Some(env) => format!("{env}_{table}"),
            None => table.to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            env_prefix: None,
            mode: RunMode::default(),
            sentinel: DEFAULT_SENTINEL.to_string(),
            volatile: VolatileFields::default(),
        }
    }
}

///
/// RunTimestamp
///
/// The single "now" of a run, fixed before indexing starts.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RunTimestamp(String);

impl RunTimestamp {
    /// Use a caller-supplied timestamp verbatim.
    pub fn fixed(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Format a UTC instant with microsecond precision.
    pub fn from_datetime(at: OffsetDateTime) -> Result<Self, Error> {
        let utc = at.to_offset(time::UtcOffset::UTC);
        let formatted = utc
            .format(RUN_TIMESTAMP_FORMAT)
            .map_err(|err| Error::config(format!("run timestamp formatting failed: {err}")))?;

        Ok(Self(formatted))
    }

    /// Capture the wall clock. Only entry points should call this.
    pub fn now_utc() -> Result<Self, Error> {
        Self::from_datetime(OffsetDateTime::now_utc())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

///
/// TESTS
///
