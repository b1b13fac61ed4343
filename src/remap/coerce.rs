//! Value coercions used by the remapper.
//!
//! Numeric coercions are best-effort and never fail: anything that cannot be read as a number
//! becomes [`Value::Null`]. Timestamp coercion is strict.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::{HarvestError, HarvestResult};
use crate::types::Value;

const DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%Y/%m/%d %H:%M:%S%.f",
];

/// Read `value` as a float. NaN counts as missing.
pub fn to_float(value: &Value) -> Option<f64> {
    let f = match value {
        Value::Int64(v) => *v as f64,
        Value::Float64(v) => *v,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Utf8(s) => s.trim().parse::<f64>().ok()?,
        Value::Null | Value::Timestamp(_) => return None,
    };
    (!f.is_nan()).then_some(f)
}

/// Read `value` as an integer, truncating fractional numbers.
pub fn to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int64(v) => Some(*v),
        Value::Utf8(s) => match s.trim().parse::<i64>() {
            Ok(v) => Some(v),
            Err(_) => float_to_int(to_float(value)?),
        },
        other => float_to_int(to_float(other)?),
    }
}

fn float_to_int(f: f64) -> Option<i64> {
    let t = f.trunc();
    (t.is_finite() && t >= i64::MIN as f64 && t < i64::MAX as f64).then_some(t as i64)
}

/// Cast to bool. Empty strings stay missing; other strings use the usual spellings, then numeric
/// truthiness, then non-emptiness.
pub fn to_bool(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(b) => Value::Bool(*b),
        Value::Int64(v) => Value::Bool(*v != 0),
        Value::Float64(v) if v.is_nan() => Value::Null,
        Value::Float64(v) => Value::Bool(*v != 0.0),
        Value::Timestamp(_) => Value::Bool(true),
        Value::Utf8(s) => {
            let t = s.trim();
            if t.is_empty() {
                return Value::Null;
            }
            match t.to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "y" => Value::Bool(true),
                "false" | "f" | "no" | "n" => Value::Bool(false),
                _ => match t.parse::<f64>() {
                    Ok(f) => Value::Bool(f != 0.0),
                    Err(_) => Value::Bool(true),
                },
            }
        }
    }
}

/// Cast to string. Missing stays missing.
pub fn to_text(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Utf8(s) => Value::Utf8(s.clone()),
        Value::Int64(v) => Value::Utf8(v.to_string()),
        Value::Float64(v) => Value::Utf8(v.to_string()),
        Value::Bool(b) => Value::Utf8(if *b { "True" } else { "False" }.to_string()),
        Value::Timestamp(ts) => Value::Utf8(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
    }
}

/// Parse a timestamp. Numbers are epoch seconds; empty cells are missing; anything else that does
/// not parse fails the conversion.
pub fn to_timestamp(column: &str, value: &Value) -> HarvestResult<Value> {
    let fail = |raw: String| HarvestError::TimestampParse {
        column: column.to_string(),
        raw,
    };
    match value {
        Value::Null => Ok(Value::Null),
        Value::Timestamp(ts) => Ok(Value::Timestamp(*ts)),
        Value::Int64(v) => from_epoch(*v as f64).ok_or_else(|| fail(v.to_string())),
        Value::Float64(v) => from_epoch(*v).ok_or_else(|| fail(v.to_string())),
        Value::Bool(b) => Err(fail(b.to_string())),
        Value::Utf8(s) => {
            let t = s.trim();
            if t.is_empty() {
                return Ok(Value::Null);
            }
            parse_datetime(t)
                .or_else(|| t.parse::<f64>().ok().and_then(from_epoch))
                .ok_or_else(|| fail(s.clone()))
        }
    }
}

fn parse_datetime(s: &str) -> Option<Value> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(Value::Timestamp(dt.naive_utc()));
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(Value::Timestamp)
}

fn from_epoch(secs: f64) -> Option<Value> {
    if !secs.is_finite() {
        return None;
    }
    let micros = (secs * 1e6).round();
    if micros.abs() >= i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_micros(micros as i64).map(|dt| Value::Timestamp(dt.naive_utc()))
}
