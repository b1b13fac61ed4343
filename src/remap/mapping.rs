//! Column mappings and the remapper that applies them.
//!
//! A [`ColumnMapping`] comes from the service's `rendered_map`:
//!
//! ```json
//! {"Voltage(V)": {"new_name": "Voltage_V", "data_type": "float", "addition": 0, "multiplier": 1}}
//! ```
//!
//! Numeric targets are computed as `(value + addition) * multiplier`. Data columns without a
//! mapping entry keep their name and are coerced to float.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use crate::error::{HarvestError, HarvestResult};
use crate::types::{DataSet, DataType, Field, RawRow, Schema, Value};

use super::coerce;

/// Target kind of a mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TargetKind {
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "str", alias = "string")]
    Text,
    #[serde(rename = "int", alias = "integer")]
    Int,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "datetime64[ns]", alias = "datetime", alias = "timestamp")]
    Timestamp,
}

/// How one raw column is converted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MappingEntry {
    pub new_name: String,
    pub data_type: TargetKind,
    #[serde(default)]
    pub addition: f64,
    #[serde(default = "unit_multiplier")]
    pub multiplier: f64,
}

fn unit_multiplier() -> f64 {
    1.0
}

impl MappingEntry {
    pub fn new(new_name: impl Into<String>, data_type: TargetKind) -> Self {
        Self {
            new_name: new_name.into(),
            data_type,
            addition: 0.0,
            multiplier: 1.0,
        }
    }

    pub fn scaled(mut self, addition: f64, multiplier: f64) -> Self {
        self.addition = addition;
        self.multiplier = multiplier;
        self
    }

    /// Column type produced by this entry.
    ///
    /// Integer targets with a fractional offset or scale produce floats.
    pub fn output_type(&self) -> DataType {
        match self.data_type {
            TargetKind::Bool => DataType::Bool,
            TargetKind::Text => DataType::Utf8,
            TargetKind::Timestamp => DataType::Timestamp,
            TargetKind::Float => DataType::Float64,
            TargetKind::Int if integral(self.addition) && integral(self.multiplier) => {
                DataType::Int64
            }
            TargetKind::Int => DataType::Float64,
        }
    }
}

fn integral(f: f64) -> bool {
    f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64
}

/// Raw column name → [`MappingEntry`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ColumnMapping {
    entries: BTreeMap<String, MappingEntry>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `rendered_map` object.
    pub fn from_json(value: &serde_json::Value) -> HarvestResult<Self> {
        Ok(Self::deserialize(value)?)
    }

    pub fn insert(&mut self, raw: impl Into<String>, entry: MappingEntry) -> &mut Self {
        self.entries.insert(raw.into(), entry);
        self
    }

    pub fn get(&self, raw: &str) -> Option<&MappingEntry> {
        self.entries.get(raw)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
enum Op {
    Bool,
    Text,
    Timestamp,
    Int { addition: i64, multiplier: i64 },
    Float { addition: f64, multiplier: f64, from_int: bool },
}

#[derive(Debug, Clone)]
struct ColumnPlan {
    source: String,
    op: Op,
}

/// A mapping resolved against a concrete list of data columns.
///
/// Building the remapper checks for name collisions once; applying it is a pure per-row
/// function, so any split of the rows into batches gives the same result.
#[derive(Debug, Clone)]
pub struct ColumnRemapper {
    schema: Schema,
    plan: Vec<ColumnPlan>,
}

impl ColumnRemapper {
    /// Resolve `mapping` against the data columns `columns` (in source order).
    ///
    /// Mapping entries for columns not in `columns` are ignored.
    pub fn new(mapping: &ColumnMapping, columns: &[String]) -> HarvestResult<Self> {
        let raw: HashSet<&str> = columns.iter().map(String::as_str).collect();
        let mut claimed: HashSet<String> = HashSet::new();
        let mut fields = Vec::with_capacity(columns.len());
        let mut plan = Vec::with_capacity(columns.len());

        for column in columns {
            let (field, op) = match mapping.get(column) {
                Some(entry) => {
                    let renamed = entry.new_name != *column;
                    if renamed && raw.contains(entry.new_name.as_str()) {
                        return Err(HarvestError::MappingCollision {
                            column: column.clone(),
                            target: entry.new_name.clone(),
                        });
                    }
                    (Field::new(&entry.new_name, entry.output_type()), op_for(entry))
                }
                None => (
                    Field::new(column, DataType::Float64),
                    Op::Float {
                        addition: 0.0,
                        multiplier: 1.0,
                        from_int: false,
                    },
                ),
            };
            if !claimed.insert(field.name.clone()) {
                return Err(HarvestError::MappingCollision {
                    column: column.clone(),
                    target: field.name,
                });
            }
            fields.push(field);
            plan.push(ColumnPlan {
                source: column.clone(),
                op,
            });
        }

        Ok(Self {
            schema: Schema::new(fields),
            plan,
        })
    }

    /// Output schema, one field per data column in source order.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Convert one raw row. Columns absent from the row are missing.
    pub fn remap_row(&self, row: &RawRow) -> HarvestResult<Vec<Value>> {
        self.plan
            .iter()
            .map(|col| {
                let raw = row.get(&col.source).unwrap_or(&Value::Null);
                apply(&col.source, &col.op, raw)
            })
            .collect()
    }

    /// Convert a batch of raw rows into a typed [`DataSet`].
    pub fn remap(&self, rows: &[RawRow]) -> HarvestResult<DataSet> {
        let rows = rows
            .iter()
            .map(|r| self.remap_row(r))
            .collect::<HarvestResult<Vec<_>>>()?;
        Ok(DataSet::new(self.schema.clone(), rows))
    }
}

fn op_for(entry: &MappingEntry) -> Op {
    match (entry.data_type, entry.output_type()) {
        (TargetKind::Bool, _) => Op::Bool,
        (TargetKind::Text, _) => Op::Text,
        (TargetKind::Timestamp, _) => Op::Timestamp,
        (TargetKind::Int, DataType::Int64) => Op::Int {
            addition: entry.addition as i64,
            multiplier: entry.multiplier as i64,
        },
        (TargetKind::Int, _) => Op::Float {
            addition: entry.addition,
            multiplier: entry.multiplier,
            from_int: true,
        },
        (TargetKind::Float, _) => Op::Float {
            addition: entry.addition,
            multiplier: entry.multiplier,
            from_int: false,
        },
    }
}

fn apply(column: &str, op: &Op, raw: &Value) -> HarvestResult<Value> {
    Ok(match op {
        Op::Bool => coerce::to_bool(raw),
        Op::Text => coerce::to_text(raw),
        Op::Timestamp => coerce::to_timestamp(column, raw)?,
        Op::Int {
            addition,
            multiplier,
        } => coerce::to_int(raw)
            .and_then(|v| v.checked_add(*addition))
            .and_then(|v| v.checked_mul(*multiplier))
            .map_or(Value::Null, Value::Int64),
        Op::Float {
            addition,
            multiplier,
            from_int,
        } => {
            let v = if *from_int {
                coerce::to_int(raw).map(|i| i as f64)
            } else {
                coerce::to_float(raw)
            };
            v.map(|v| (v + addition) * multiplier)
                .filter(|v| !v.is_nan())
                .map_or(Value::Null, Value::Float64)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::Utf8(v.to_string())))
            .collect()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_rendered_map() {
        let mapping = ColumnMapping::from_json(&json!({
            "Voltage(V)": {"new_name": "Voltage_V", "data_type": "float", "addition": 0, "multiplier": 1},
            "Date_Time": {"new_name": "Date", "data_type": "datetime64[ns]"},
            "Step": {"new_name": "Step", "data_type": "int", "multiplier": 2},
            "Label": {"new_name": "Label", "data_type": "str"},
        }))
        .unwrap();
        assert_eq!(mapping.len(), 4);
        assert_eq!(mapping.get("Date_Time").unwrap().data_type, TargetKind::Timestamp);
        assert_eq!(mapping.get("Date_Time").unwrap().multiplier, 1.0);
        assert_eq!(mapping.get("Step").unwrap().addition, 0.0);
    }

    #[test]
    fn numeric_columns_are_offset_then_scaled() {
        let mut mapping = ColumnMapping::new();
        mapping
            .insert("I(mA)", MappingEntry::new("Current_A", TargetKind::Float).scaled(5.0, 0.001))
            .insert("Cycle", MappingEntry::new("Cycle", TargetKind::Int).scaled(1.0, 3.0));
        let remapper = ColumnRemapper::new(&mapping, &cols(&["I(mA)", "Cycle"])).unwrap();

        let out = remapper
            .remap(&[row(&[("I(mA)", "995"), ("Cycle", "2")]), row(&[("I(mA)", "n/a"), ("Cycle", "x")])])
            .unwrap();

        assert_eq!(out.schema.field_names().collect::<Vec<_>>(), vec!["Current_A", "Cycle"]);
        assert_eq!(out.schema.fields[1].data_type, DataType::Int64);
        assert_eq!(out.rows[0][0], Value::Float64((995.0 + 5.0) * 0.001));
        assert_eq!(out.rows[0][1], Value::Int64(9));
        assert_eq!(out.rows[1], vec![Value::Null, Value::Null]);
    }

    #[test]
    fn fractional_scale_on_int_target_yields_float() {
        let mut mapping = ColumnMapping::new();
        mapping.insert("n", MappingEntry::new("n", TargetKind::Int).scaled(0.0, 0.5));
        let remapper = ColumnRemapper::new(&mapping, &cols(&["n"])).unwrap();
        assert_eq!(remapper.schema().fields[0].data_type, DataType::Float64);
        assert_eq!(
            remapper.remap_row(&row(&[("n", "3.9")])).unwrap(),
            vec![Value::Float64(1.5)]
        );
    }

    #[test]
    fn unmapped_columns_pass_through_as_float() {
        let mapping = ColumnMapping::new();
        let remapper = ColumnRemapper::new(&mapping, &cols(&["aux", "note"])).unwrap();
        let out = remapper
            .remap_row(&row(&[("aux", "1e3"), ("note", "hello")]))
            .unwrap();
        assert_eq!(out, vec![Value::Float64(1000.0), Value::Null]);
    }

    #[test]
    fn rename_onto_existing_column_is_a_collision() {
        let mut mapping = ColumnMapping::new();
        mapping.insert("a", MappingEntry::new("b", TargetKind::Float));
        let err = ColumnRemapper::new(&mapping, &cols(&["a", "b"])).unwrap_err();
        assert!(matches!(err, HarvestError::MappingCollision { .. }));

        let mut twice = ColumnMapping::new();
        twice
            .insert("a", MappingEntry::new("x", TargetKind::Float))
            .insert("b", MappingEntry::new("x", TargetKind::Float));
        assert!(ColumnRemapper::new(&twice, &cols(&["a", "b"])).is_err());

        // Identity renames are fine, and entries for absent columns are ignored.
        let mut same = ColumnMapping::new();
        same.insert("a", MappingEntry::new("a", TargetKind::Float))
            .insert("zzz", MappingEntry::new("b", TargetKind::Float));
        assert!(ColumnRemapper::new(&same, &cols(&["a", "b"])).is_ok());
    }

    #[test]
    fn bad_timestamp_fails_the_batch() {
        let mut mapping = ColumnMapping::new();
        mapping.insert("when", MappingEntry::new("Date", TargetKind::Timestamp));
        let remapper = ColumnRemapper::new(&mapping, &cols(&["when"])).unwrap();
        let rows = [row(&[("when", "2023-05-01 12:00:00")]), row(&[("when", "soon")])];
        assert!(matches!(
            remapper.remap(&rows),
            Err(HarvestError::TimestampParse { .. })
        ));
    }

    #[test]
    fn remapping_is_deterministic_and_batch_independent() {
        let mut mapping = ColumnMapping::new();
        mapping
            .insert("v", MappingEntry::new("Voltage_V", TargetKind::Float).scaled(-0.5, 2.0))
            .insert("ok", MappingEntry::new("Ok", TargetKind::Bool));
        let remapper = ColumnRemapper::new(&mapping, &cols(&["v", "ok"])).unwrap();
        let rows: Vec<RawRow> = (0..7)
            .map(|i| {
                let v = if i % 3 == 0 { "junk".to_string() } else { format!("{i}.25") };
                let mut r = row(&[("ok", if i % 2 == 0 { "true" } else { "0" })]);
                r.insert("v".into(), Value::Utf8(v));
                r
            })
            .collect();

        let whole = remapper.remap(&rows).unwrap();
        assert_eq!(whole, remapper.remap(&rows).unwrap());

        let mut pieces = remapper.remap(&rows[..3]).unwrap();
        pieces.rows.extend(remapper.remap(&rows[3..]).unwrap().rows);
        assert_eq!(whole, pieces);
    }
}
