//! Parquet persistence of converted partitions.
//!
//! Every column is written OPTIONAL so that missing values survive as nulls. No row index is
//! stored. The producing version is recorded in the file's key-value metadata.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use parquet::basic::{ConvertedType, Repetition, Type as PhysicalType};
use parquet::column::writer::ColumnWriter;
use parquet::data_type::ByteArray;
use parquet::errors::ParquetError;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::FileReader;
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::file::writer::SerializedFileWriter;
use parquet::record::Field as RecordField;
use parquet::schema::types::{ColumnDescriptor, Type};

use crate::error::{HarvestError, HarvestResult};
use crate::types::{DataSet, DataType, Field, Schema, Value};

/// Key-value metadata key recording the producing software's version.
pub const VERSION_METADATA_KEY: &str = "instrument-harvester-version";

fn parquet_schema(schema: &Schema) -> HarvestResult<Type> {
    let fields = schema
        .fields
        .iter()
        .map(|f| {
            let (physical, converted) = match f.data_type {
                DataType::Bool => (PhysicalType::BOOLEAN, ConvertedType::NONE),
                DataType::Int64 => (PhysicalType::INT64, ConvertedType::NONE),
                DataType::Float64 => (PhysicalType::DOUBLE, ConvertedType::NONE),
                DataType::Utf8 => (PhysicalType::BYTE_ARRAY, ConvertedType::UTF8),
                DataType::Timestamp => (PhysicalType::INT64, ConvertedType::TIMESTAMP_MICROS),
            };
            Type::primitive_type_builder(&f.name, physical)
                .with_repetition(Repetition::OPTIONAL)
                .with_converted_type(converted)
                .build()
                .map(Arc::new)
        })
        .collect::<Result<Vec<_>, ParquetError>>()?;
    Ok(Type::group_type_builder("schema")
        .with_fields(fields)
        .build()?)
}

/// Non-null values of column `idx` plus the definition level of every row.
fn column_values<T>(data: &DataSet, idx: usize, f: impl Fn(&Value) -> Option<T>) -> (Vec<T>, Vec<i16>) {
    let mut values = Vec::with_capacity(data.rows.len());
    let mut defs = Vec::with_capacity(data.rows.len());
    for row in &data.rows {
        match row.get(idx).and_then(&f) {
            Some(v) => {
                values.push(v);
                defs.push(1);
            }
            None => defs.push(0),
        }
    }
    (values, defs)
}

/// Write `data` as a single-row-group Parquet file at `path`.
pub fn write_partition(path: &Path, data: &DataSet, producer_version: &str) -> HarvestResult<()> {
    let schema = Arc::new(parquet_schema(&data.schema)?);
    let props = Arc::new(
        WriterProperties::builder()
            .set_key_value_metadata(Some(vec![KeyValue::new(
                VERSION_METADATA_KEY.to_string(),
                producer_version.to_string(),
            )]))
            .build(),
    );
    let file = File::create(path)?;
    let mut writer = SerializedFileWriter::new(file, schema, props)?;

    let mut row_group = writer.next_row_group()?;
    let mut idx = 0;
    while let Some(mut col) = row_group.next_column()? {
        match col.untyped() {
            ColumnWriter::BoolColumnWriter(w) => {
                let (vals, defs) = column_values(data, idx, |v| match v {
                    Value::Bool(b) => Some(*b),
                    _ => None,
                });
                w.write_batch(&vals, Some(&defs), None)?;
            }
            ColumnWriter::Int64ColumnWriter(w) => {
                let timestamp = data.schema.fields[idx].data_type == DataType::Timestamp;
                let (vals, defs) = column_values(data, idx, |v| match v {
                    Value::Int64(i) if !timestamp => Some(*i),
                    Value::Timestamp(ts) if timestamp => Some(ts.and_utc().timestamp_micros()),
                    _ => None,
                });
                w.write_batch(&vals, Some(&defs), None)?;
            }
            ColumnWriter::DoubleColumnWriter(w) => {
                let (vals, defs) = column_values(data, idx, Value::as_f64);
                w.write_batch(&vals, Some(&defs), None)?;
            }
            ColumnWriter::ByteArrayColumnWriter(w) => {
                let (vals, defs) = column_values(data, idx, |v| match v {
                    Value::Utf8(s) => Some(ByteArray::from(s.as_str())),
                    _ => None,
                });
                w.write_batch(&vals, Some(&defs), None)?;
            }
            _ => {
                return Err(HarvestError::Parquet(ParquetError::General(format!(
                    "unexpected column writer for '{}'",
                    data.schema.fields[idx].name
                ))));
            }
        }
        col.close()?;
        idx += 1;
    }
    row_group.close()?;
    writer.close()?;
    Ok(())
}

/// A partition read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionContents {
    pub data: DataSet,
    pub key_value_metadata: BTreeMap<String, String>,
}

impl PartitionContents {
    /// The recorded producer version, if any.
    pub fn producer_version(&self) -> Option<&str> {
        self.key_value_metadata
            .get(VERSION_METADATA_KEY)
            .map(String::as_str)
    }
}

fn data_type_of(column: &ColumnDescriptor) -> HarvestResult<DataType> {
    match (column.physical_type(), column.converted_type()) {
        (PhysicalType::BOOLEAN, _) => Ok(DataType::Bool),
        (PhysicalType::INT64, ConvertedType::TIMESTAMP_MICROS) => Ok(DataType::Timestamp),
        (PhysicalType::INT64, _) => Ok(DataType::Int64),
        (PhysicalType::DOUBLE, _) => Ok(DataType::Float64),
        (PhysicalType::BYTE_ARRAY, _) => Ok(DataType::Utf8),
        (other, _) => Err(HarvestError::Parquet(ParquetError::General(format!(
            "unsupported physical type {other} for column '{}'",
            column.name()
        )))),
    }
}

fn to_value(field: &RecordField) -> Value {
    match field {
        RecordField::Bool(b) => Value::Bool(*b),
        RecordField::Long(v) => Value::Int64(*v),
        RecordField::Double(v) => Value::Float64(*v),
        RecordField::Str(s) => Value::Utf8(s.clone()),
        RecordField::TimestampMicros(us) => chrono::DateTime::from_timestamp_micros(*us)
            .map(|dt| Value::Timestamp(dt.naive_utc()))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Read a partition written by [`write_partition`].
pub fn read_partition(path: &Path) -> HarvestResult<PartitionContents> {
    let reader = SerializedFileReader::try_from(path)?;

    let file_meta = reader.metadata().file_metadata();
    let fields = file_meta
        .schema_descr()
        .columns()
        .iter()
        .map(|c| Ok(Field::new(c.name(), data_type_of(c)?)))
        .collect::<HarvestResult<Vec<_>>>()?;
    let key_value_metadata = file_meta
        .key_value_metadata()
        .map(|kvs| {
            kvs.iter()
                .filter_map(|kv| kv.value.clone().map(|v| (kv.key.clone(), v)))
                .collect()
        })
        .unwrap_or_default();
    let schema = Schema::new(fields);

    let mut rows = Vec::new();
    for row in reader.into_iter() {
        let row = row?;
        let mut out = vec![Value::Null; schema.fields.len()];
        for (name, field) in row.get_column_iter() {
            if let Some(idx) = schema.index_of(name) {
                out[idx] = to_value(field);
            }
        }
        rows.push(out);
    }

    Ok(PartitionContents {
        data: DataSet::new(schema, rows),
        key_value_metadata,
    })
}
