use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Value;

pub const ID_FIELD: &str = "id";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RowError {
    #[error("row has no `id` field")]
    MissingId,
    #[error("row `id` must be an integer or a string, got {0}")]
    BadIdType(&'static str),
}

/// The primary key of a row within its table. Stable for the row's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    Int(i64),
    Str(String),
}

impl RowId {
    pub fn from_value(v: &Value) -> Result<RowId, RowError> {
        match v {
            Value::Int(n) => Ok(RowId::Int(*n)),
            Value::String(s) => Ok(RowId::Str(s.clone())),
            Value::Null => Err(RowError::MissingId),
            Value::Bool(_) => Err(RowError::BadIdType("bool")),
            Value::Float(_) => Err(RowError::BadIdType("float")),
            Value::Array(_) => Err(RowError::BadIdType("array")),
            Value::Object(_) => Err(RowError::BadIdType("object")),
        }
    }

    /// The integer form of the id, for row-id tracking. String ids are not
    /// tracked and return `None`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RowId::Int(n) => Some(*n),
            RowId::Str(_) => None,
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RowId::Int(n) => write!(f, "{n}"),
            RowId::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RowId {
    fn from(n: i64) -> Self {
        RowId::Int(n)
    }
}

impl From<&str> for RowId {
    fn from(s: &str) -> Self {
        RowId::Str(s.to_owned())
    }
}

/// A single row: a mapping from field name to [`Value`].
///
/// Every stored row carries an `id` field; rows without one are rejected
/// before they reach a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(pub BTreeMap<String, Value>);

impl Row {
    pub fn new() -> Row {
        Row(BTreeMap::new())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// The value at `field`, with absence flattened to `Null`. Filtering and
    /// sorting treat a missing field as Null.
    pub fn get_or_null(&self, field: &str) -> &Value {
        self.0.get(field).unwrap_or(&Value::Null)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn id(&self) -> Result<RowId, RowError> {
        RowId::from_value(self.get(ID_FIELD).ok_or(RowError::MissingId)?)
    }

    /// The row's `updatedAt` version as a comparable number, if present and
    /// parseable. Integers and floats are taken as epoch seconds; strings
    /// are parsed as ISO-8601 timestamps.
    pub fn version(&self) -> Option<f64> {
        parse_version(self.get(UPDATED_AT_FIELD)?)
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Row {
        Row(iter.into_iter().collect())
    }
}

/// Last-writer-wins: may `incoming` displace `existing`?
///
/// A strictly older incoming row never does, and an unversioned incoming
/// row never displaces a versioned one. Equal versions replace, so a
/// same-tick rewrite converges on the latest payload.
pub fn lww_accepts(existing: &Row, incoming: &Row) -> bool {
    match (existing.version(), incoming.version()) {
        (Some(_), None) => false,
        (Some(old), Some(new)) => new >= old,
        (None, _) => true,
    }
}

fn parse_version(v: &Value) -> Option<f64> {
    match v {
        Value::Int(n) => Some(*n as f64),
        Value::Float(f) => Some(*f),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.timestamp_millis() as f64 / 1000.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn id_extraction() {
        assert_eq!(row(&[("id", Value::Int(3))]).id(), Ok(RowId::Int(3)));
        assert_eq!(row(&[("id", Value::String("u-1".into()))]).id(), Ok(RowId::from("u-1")));
        assert_eq!(row(&[("name", Value::Null)]).id(), Err(RowError::MissingId));
        assert_eq!(row(&[("id", Value::Float(1.0))]).id(), Err(RowError::BadIdType("float")));
    }

    #[test]
    fn version_parses_numbers_and_iso_strings() {
        assert_eq!(row(&[("updatedAt", Value::Int(100))]).version(), Some(100.0));
        assert_eq!(row(&[("updatedAt", Value::Float(100.5))]).version(), Some(100.5));
        let iso = row(&[("updatedAt", Value::String("1970-01-01T00:01:40Z".into()))]);
        assert_eq!(iso.version(), Some(100.0));
        assert_eq!(row(&[("updatedAt", Value::String("not a date".into()))]).version(), None);
        assert_eq!(row(&[]).version(), None);
    }

    #[test]
    fn missing_field_reads_as_null() {
        let r = row(&[("id", Value::Int(1))]);
        assert!(r.get_or_null("email").is_null());
    }
}
