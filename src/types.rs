//! Core data model types for harvesting.
//!
//! Capabilities produce [`RawRow`]s (column name → raw [`Value`]); the remapper turns a batch of
//! them into a typed [`DataSet`] whose shape is described by a [`Schema`] (a list of typed
//! [`Field`]s).

use std::collections::HashMap;

use chrono::NaiveDateTime;

/// Logical data type for a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Utf8,
    /// Date and time without a timezone, stored with microsecond precision.
    Timestamp,
}

/// A single named, typed field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field/column name.
    pub name: String,
    /// Field data type.
    pub data_type: DataType,
}

impl Field {
    /// Create a new field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// An ordered list of fields describing the shape of a [`DataSet`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// A single value, either raw (as read by a capability) or typed (after remapping).
///
/// [`Value::Null`] is the missing marker: empty cells and values that could not be coerced to a
/// numeric target both end up as `Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
    /// Naive date-time.
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Render the value the way it is shown in a data summary.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Int64(v) => serde_json::Value::from(*v),
            Value::Float64(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(v) => serde_json::Value::Bool(*v),
            Value::Utf8(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(ts) => {
                serde_json::Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
        }
    }
}

/// One row as produced by a capability: column name → raw value.
pub type RawRow = HashMap<String, Value>;

/// Per-column information published by a capability.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnMeta {
    /// Whether the column carries data rows (as opposed to being a label only).
    pub has_data: bool,
    /// Physical unit, when the format declares one.
    pub unit: Option<String>,
}

impl ColumnMeta {
    /// A data-bearing column without a declared unit.
    pub fn with_data() -> Self {
        Self {
            has_data: true,
            unit: None,
        }
    }
}

/// Ordered mapping from column name to [`ColumnMeta`].
///
/// Order is the source order of the file; it determines the column order of every partition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnInfo {
    columns: Vec<(String, ColumnMeta)>,
}

impl ColumnInfo {
    /// Build column info from `(name, meta)` pairs in source order.
    pub fn new(columns: Vec<(String, ColumnMeta)>) -> Self {
        Self { columns }
    }

    /// Every name in `names` is a data-bearing column without a unit.
    pub fn all_with_data<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            names
                .into_iter()
                .map(|n| (n.into(), ColumnMeta::with_data()))
                .collect(),
        )
    }

    /// Look up the metadata of a column.
    pub fn get(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    /// Iterate `(name, meta)` pairs in source order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnMeta)> {
        self.columns.iter().map(|(n, m)| (n.as_str(), m))
    }

    /// Names of the columns flagged `has_data`, in source order.
    pub fn data_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|(_, m)| m.has_data)
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` when no columns are known.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// In-memory tabular batch.
///
/// Rows are stored as `Vec<Vec<Value>>` in the same order as the [`Schema`] fields.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    /// Schema describing row shape.
    pub schema: Schema,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
}

impl DataSet {
    /// Create a dataset from schema and rows.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self { schema, rows }
    }

    /// Number of rows in the dataset.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Iterate the values of one column, if it exists.
    pub fn column<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Value> + use<'a>> {
        let idx = self.schema.index_of(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }
}
