use std::sync::Arc;

use rusqlite::types::Value as SqliteValue;
use rusqlite::{Connection, params_from_iter};

use super::params::from_sqlite_value;
use crate::error::SqlFxError;
use crate::results::ResultSet;

/// Map a rusqlite error, keeping SQLite's extended result code.
pub(crate) fn map_sqlite_error(err: rusqlite::Error) -> SqlFxError {
    let code = match &err {
        rusqlite::Error::SqliteFailure(failure, _) => Some(failure.extended_code.to_string()),
        _ => None,
    };
    let mapped = SqlFxError::execution(format!("sqlite error: {err}"));
    let mapped = match code {
        Some(code) => mapped.with_code(code),
        None => mapped,
    };
    mapped.with_source(err)
}

/// Run one statement. Statements without result columns report the changed row count.
pub(crate) fn run(
    conn: &mut Connection,
    sql: &str,
    params: &[SqliteValue],
) -> Result<ResultSet, SqlFxError> {
    let mut stmt = conn.prepare(sql).map_err(map_sqlite_error)?;
    if stmt.column_count() == 0 {
        let changed = stmt
            .execute(params_from_iter(params.iter()))
            .map_err(map_sqlite_error)?;
        return Ok(ResultSet::affected(changed));
    }

    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let width = column_names.len();

    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(Arc::new(column_names));

    let mut rows = stmt
        .query(params_from_iter(params.iter()))
        .map_err(map_sqlite_error)?;
    while let Some(row) = rows.next().map_err(map_sqlite_error)? {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            let value: SqliteValue = row.get(idx).map_err(map_sqlite_error)?;
            values.push(from_sqlite_value(value));
        }
        result_set.add_row_values(values);
    }
    Ok(result_set)
}
