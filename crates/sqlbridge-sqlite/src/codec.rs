//! Conversion between application values and SQLite storage classes.

use crate::affinity;
use crate::native::SqliteValue;
use sqlbridge_core::{ColumnInfo, Row, Value};
use std::sync::Arc;

/// Timestamps are stored as ISO-8601 UTC text with millisecond precision.
///
/// Only years 0000 to 9999 round-trip. Other years are written with a sign
/// (`+10000-01-01T…`), which affinity decoding does not recognise, so they
/// read back as plain text.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Convert an application value into something SQLite can bind.
pub fn serialize(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Text(if *b { "true" } else { "false" }.to_string()),
        Value::Integer(i) => SqliteValue::Integer(*i),
        Value::Real(f) => SqliteValue::Real(*f),
        Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Bytes(b) => SqliteValue::Blob(b.clone()),
        Value::Timestamp(ts) => SqliteValue::Text(ts.format(TIMESTAMP_FORMAT).to_string()),
        Value::Json(json) => SqliteValue::Text(json.to_string()),
    }
}

/// Serialize statement parameters, keeping their order.
pub fn serialize_params(params: &[Value]) -> Vec<SqliteValue> {
    params.iter().map(serialize).collect()
}

/// Convert a value read from SQLite back into an application value.
///
/// Without affinity conversion the storage class decides the variant. With
/// it, text that looks like a boolean, timestamp or JSON is decoded.
pub fn deserialize(value: SqliteValue, auto_affinity: bool) -> Value {
    match value {
        SqliteValue::Null => Value::Null,
        SqliteValue::Integer(i) => Value::Integer(i),
        SqliteValue::Real(f) => Value::Real(f),
        SqliteValue::Blob(b) => Value::Bytes(b),
        SqliteValue::Text(s) if auto_affinity => affinity::decode_text(s),
        SqliteValue::Text(s) => Value::Text(s),
    }
}

/// Build one row from native column values.
pub fn deserialize_row(columns: &Arc<ColumnInfo>, values: Vec<SqliteValue>, auto_affinity: bool) -> Row {
    let values = values
        .into_iter()
        .map(|v| deserialize(v, auto_affinity))
        .collect();
    Row::with_columns(Arc::clone(columns), values)
}

/// Build rows that share one set of column names.
pub fn deserialize_rows(
    columns: Vec<String>,
    rows: Vec<Vec<SqliteValue>>,
    auto_affinity: bool,
) -> Vec<Row> {
    let columns = Arc::new(ColumnInfo::new(columns));
    rows.into_iter()
        .map(|values| deserialize_row(&columns, values, auto_affinity))
        .collect()
}
