use rusqlite::types::Value as SqliteValue;

use crate::types::Value;

/// Convert a bound parameter into a rusqlite value.
///
/// SQLite has no boolean, timestamp or JSON storage class: booleans bind as 0/1,
/// timestamps as `YYYY-MM-DD HH:MM:SS[.fff]` text, JSON as its serialized text.
#[must_use]
pub fn to_sqlite_value(value: &Value) -> SqliteValue {
    match value {
        Value::Int(i) => SqliteValue::Integer(*i),
        Value::Float(f) => SqliteValue::Real(*f),
        Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Timestamp(dt) => SqliteValue::Text(dt.format("%F %T%.f").to_string()),
        Value::Null => SqliteValue::Null,
        Value::Json(json) => SqliteValue::Text(json.to_string()),
        Value::Blob(bytes) => SqliteValue::Blob(bytes.clone()),
    }
}

/// Owned parameter list, movable onto the blocking pool.
pub(crate) struct Params(pub(crate) Vec<SqliteValue>);

impl Params {
    pub(crate) fn convert(params: &[Value]) -> Self {
        Params(params.iter().map(to_sqlite_value).collect())
    }
}

/// Convert a column value read back from SQLite.
#[must_use]
pub fn from_sqlite_value(value: SqliteValue) -> Value {
    match value {
        SqliteValue::Null => Value::Null,
        SqliteValue::Integer(i) => Value::Int(i),
        SqliteValue::Real(f) => Value::Float(f),
        SqliteValue::Text(s) => Value::Text(s),
        SqliteValue::Blob(b) => Value::Blob(b),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;

    #[test]
    fn storage_classes_without_a_native_type_are_encoded() {
        assert_eq!(to_sqlite_value(&Value::Bool(true)), SqliteValue::Integer(1));
        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_milli_opt(8, 15, 0, 250)
            .unwrap();
        assert_eq!(
            to_sqlite_value(&Value::Timestamp(ts)),
            SqliteValue::Text("2024-03-09 08:15:00.250".to_string())
        );
        assert_eq!(
            to_sqlite_value(&Value::Json(json!({"a": 1}))),
            SqliteValue::Text(r#"{"a":1}"#.to_string())
        );
    }
}
