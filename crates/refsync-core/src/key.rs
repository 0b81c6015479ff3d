use crate::Record;
use derive_more::{Deref, IntoIterator};
use serde_json::{Number, Value};
use std::{cmp::Ordering, fmt};

///
/// KeyValue
///
/// One scalar component of a composite key.
/// Only JSON scalars can identify a row; arrays, objects and null cannot.
///

#[derive(Clone, Debug)]
pub enum KeyValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Text(String),
}

impl KeyValue {
    // ── Variant ranks (do not reorder) ─────────────────
    const RANK_BOOL: u8 = 0;
    const RANK_NUMBER: u8 = 1;
    const RANK_TEXT: u8 = 2;

    /// Lift a JSON value into a key component; `None` for non-scalars.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => Some(Self::from_number(n)),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    fn from_number(n: &Number) -> Self {
        if let Some(i) = n.as_i64() {
            Self::Int(i)
        } else if let Some(u) = n.as_u64() {
            Self::Uint(u)
        } else {
            Self::Float(n.as_f64().unwrap_or(f64::NAN))
        }
    }

    /// Render back into the JSON value a store client sends.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Uint(u) => Value::from(*u),
            Self::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Self::Text(s) => Value::String(s.clone()),
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Bool(_) => Self::RANK_BOOL,
            Self::Int(_) | Self::Uint(_) | Self::Float(_) => Self::RANK_NUMBER,
            Self::Text(_) => Self::RANK_TEXT,
        }
    }

    fn integer(&self) -> Option<i128> {
        match self {
            Self::Int(i) => Some(i128::from(*i)),
            Self::Uint(u) => Some(i128::from(*u)),
            _ => None,
        }
    }

    fn cmp_numeric(&self, other: &Self) -> Ordering {
        match (self, other) {
            // -0.0 and 0.0 are one key
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b).unwrap_or_else(|| a.total_cmp(b)),
            (Self::Float(a), _) => other
                .integer()
                .map_or(Ordering::Equal, |b| cmp_int_float(b, *a).reverse()),
            (_, Self::Float(b)) => self
                .integer()
                .map_or(Ordering::Equal, |a| cmp_int_float(a, *b)),
            _ => match (self.integer(), other.integer()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => Ordering::Equal,
            },
        }
    }
}

/// Exact ordering of an integer against a float, without rounding either.
#[expect(clippy::cast_possible_truncation)]
fn cmp_int_float(int: i128, float: f64) -> Ordering {
    // 2^64: beyond every i64 and u64 magnitude
    const BOUND: f64 = 18_446_744_073_709_551_616.0;

    if float.is_nan() {
        return if float.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if float >= BOUND {
        return Ordering::Less;
    }
    if float < -BOUND {
        return Ordering::Greater;
    }

    let whole = float.trunc();
    int.cmp(&(whole as i128))
        .then_with(|| whole.partial_cmp(&float).unwrap_or(Ordering::Equal))
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = self.rank().cmp(&other.rank());
        if rank != Ordering::Equal {
            return rank;
        }

        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => self.cmp_numeric(other),
        }
    }
}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyValue {}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Uint(u) => write!(f, "{u}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

///
/// CompositeKey
///
/// Ordered tuple of key values, one per schema key field, in schema order.
/// Tables are flat maps from this tuple to their leaf.
///

#[derive(Clone, Debug, Deref, Eq, IntoIterator, Ord, PartialEq, PartialOrd)]
pub struct CompositeKey(#[into_iterator(owned, ref)] Vec<KeyValue>);

impl CompositeKey {
    #[must_use]
    pub const fn new(values: Vec<KeyValue>) -> Self {
        Self(values)
    }

    /// Extract the key tuple from a record, in `key_fields` order.
    ///
    /// Fails on the first key field that is absent or not a scalar.
    pub fn from_record(record: &Record, key_fields: &[String]) -> Result<Self, KeyExtractError> {
        let mut values = Vec::with_capacity(key_fields.len());
        for field in key_fields {
            let value = record
                .get(field)
                .ok_or_else(|| KeyExtractError::Missing(field.clone()))?;
            let value =
                KeyValue::from_json(value).ok_or_else(|| KeyExtractError::NonScalar(field.clone()))?;
            values.push(value);
        }

        Ok(Self(values))
    }

    /// Pair each key field name with its JSON value.
    #[must_use]
    pub fn to_fields(&self, key_fields: &[String]) -> Record {
        key_fields
            .iter()
            .zip(&self.0)
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, ")")
    }
}

///
/// KeyExtractError
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyExtractError {
    Missing(String),
    NonScalar(String),
}

///
/// TESTS
///
