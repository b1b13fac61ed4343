//! File metadata as reported in the `file metadata` stage.
//!
//! Capabilities describe their files with a tree of [`MetaValue`]s. Before reporting, the tree is
//! serialized with [`MetaValue::to_json`]: datetimes become numeric epoch seconds, dates become
//! calendar-date strings, and lists/maps are walked recursively.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};

/// Metadata key that carries the date a test was started.
pub const TEST_DATE_KEY: &str = "Date of Test";

/// A metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    /// Interpreted as UTC.
    DateTime(NaiveDateTime),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    /// Serialize to JSON, converting nested dates and datetimes.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            MetaValue::Null => serde_json::Value::Null,
            MetaValue::Bool(b) => serde_json::Value::Bool(*b),
            MetaValue::Int(i) => serde_json::Value::from(*i),
            MetaValue::Float(f) => float_json(*f),
            MetaValue::Text(s) => serde_json::Value::String(s.clone()),
            MetaValue::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            MetaValue::DateTime(dt) => {
                let utc = dt.and_utc();
                let secs = utc.timestamp() as f64 + f64::from(utc.timestamp_subsec_micros()) / 1e6;
                float_json(secs)
            }
            MetaValue::List(items) => {
                serde_json::Value::Array(items.iter().map(MetaValue::to_json).collect())
            }
            MetaValue::Map(map) => map_to_json(map),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Text(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Text(s)
    }
}

impl<T: Into<MetaValue>> From<Option<T>> for MetaValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(MetaValue::Null)
    }
}

fn float_json(f: f64) -> serde_json::Value {
    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// Serialize a metadata map.
pub fn map_to_json(map: &BTreeMap<String, MetaValue>) -> serde_json::Value {
    serde_json::Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// Metadata extracted from a file by its capability.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileMetadata {
    /// Arbitrary key/value metadata about the file as a whole.
    pub core: BTreeMap<String, MetaValue>,
    /// Per-column metadata, keyed by column name.
    pub extra: BTreeMap<String, BTreeMap<String, MetaValue>>,
}

impl FileMetadata {
    /// The serialized test date, or `null` when the format does not record one.
    pub fn test_date(&self) -> serde_json::Value {
        self.core
            .get(TEST_DATE_KEY)
            .map(MetaValue::to_json)
            .unwrap_or(serde_json::Value::Null)
    }

    /// Serialized per-column metadata.
    pub fn extra_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.extra
                .iter()
                .map(|(k, v)| (k.clone(), map_to_json(v)))
                .collect(),
        )
    }
}
