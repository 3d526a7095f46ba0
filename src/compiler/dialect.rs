//! Compiler presets for the supported SQL dialects.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::{Compiler, PlaceholderStyle, Placeholders, RecordTable, Rendered};
use crate::error::SqlFxError;
use crate::fragment::CustomSegment;
use crate::types::Value;

/// The SQL dialects this crate ships compiler presets for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `PostgreSQL`: `$1` placeholders, `"quoted"` identifiers.
    Postgres,
    /// `MySQL`: `?` placeholders, `` `quoted` `` identifiers.
    Mysql,
    /// SQL Server: `@a` placeholders, `[quoted]` identifiers.
    Mssql,
    /// `SQLite`: `?` placeholders, `"quoted"` identifiers.
    Sqlite,
}

impl Dialect {
    #[must_use]
    pub fn placeholder_style(self) -> PlaceholderStyle {
        match self {
            Dialect::Postgres => PlaceholderStyle::Dollar,
            Dialect::Mysql | Dialect::Sqlite => PlaceholderStyle::Question,
            Dialect::Mssql => PlaceholderStyle::AtLetter,
        }
    }

    /// Opening and closing identifier quote characters.
    #[must_use]
    pub fn quotes(self) -> (char, char) {
        match self {
            Dialect::Postgres | Dialect::Sqlite => ('"', '"'),
            Dialect::Mysql => ('`', '`'),
            Dialect::Mssql => ('[', ']'),
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
            Dialect::Mssql => "mssql",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// The preset compiler for this dialect.
    #[must_use]
    pub fn compiler(self) -> Compiler {
        let style = self.placeholder_style();
        let (open, close) = self.quotes();
        let compiler = Compiler::new(
            move |index| style.render(index),
            move |name| quote_identifier(name, open, close),
        )
        .with_name(self.name())
        .with_custom(move |segment: &CustomSegment, placeholders: &mut Placeholders<'_>| {
            render_custom(self, segment, placeholders)
        });

        match self {
            Dialect::Postgres | Dialect::Mssql => compiler,
            // Neither accepts column aliases on a VALUES list.
            Dialect::Mysql | Dialect::Sqlite => compiler.with_update_table(render_union_table),
        }
    }
}

/// Quote every `.`-separated part of `name`, doubling the closing quote inside a part.
#[must_use]
pub fn quote_identifier(name: &str, open: char, close: char) -> String {
    let doubled = format!("{close}{close}");
    name.split('.')
        .map(|part| format!("{open}{}{close}", part.replace(close, &doubled)))
        .collect::<Vec<_>>()
        .join(".")
}

fn row_placeholders(row: &[Value], placeholders: &mut Placeholders<'_>) -> String {
    let list: Vec<String> = row.iter().map(|_| placeholders.next_placeholder()).collect();
    format!("({})", list.join(","))
}

/// `("a","b") VALUES (?,?),(?,?)`
///
/// # Errors
/// Never fails; the signature matches the insert hook.
pub fn render_insert_values(
    table: &RecordTable,
    placeholders: &mut Placeholders<'_>,
) -> Result<Rendered, SqlFxError> {
    let rows: Vec<String> = table
        .rows
        .iter()
        .map(|row| row_placeholders(row, placeholders))
        .collect();
    Ok((
        format!("({}) VALUES {}", table.columns.join(","), rows.join(",")),
        table.rows.iter().flatten().cloned().collect(),
    ))
}

/// `(values ($1,$2),($3,$4)) AS "alias"("a","b")`
///
/// # Errors
/// Returns `SqlFxError::CompileError` when the helper has no alias.
pub fn render_values_table(
    table: &RecordTable,
    placeholders: &mut Placeholders<'_>,
) -> Result<Rendered, SqlFxError> {
    let alias = require_alias(table)?;
    let rows: Vec<String> = table
        .rows
        .iter()
        .map(|row| row_placeholders(row, placeholders))
        .collect();
    Ok((
        format!(
            "(values {}) AS {alias}({})",
            rows.join(","),
            table.columns.join(",")
        ),
        table.rows.iter().flatten().cloned().collect(),
    ))
}

/// `(SELECT ? AS a, ? AS b UNION ALL SELECT ?, ?) AS alias`
///
/// # Errors
/// Returns `SqlFxError::CompileError` when the helper has no alias.
pub fn render_union_table(
    table: &RecordTable,
    placeholders: &mut Placeholders<'_>,
) -> Result<Rendered, SqlFxError> {
    let alias = require_alias(table)?;
    let mut selects = Vec::with_capacity(table.rows.len());
    for (i, row) in table.rows.iter().enumerate() {
        let cells: Vec<String> = row
            .iter()
            .zip(&table.columns)
            .map(|(_, column)| {
                let placeholder = placeholders.next_placeholder();
                if i == 0 {
                    format!("{placeholder} AS {column}")
                } else {
                    placeholder
                }
            })
            .collect();
        selects.push(format!("SELECT {}", cells.join(", ")));
    }
    Ok((
        format!("({}) AS {alias}", selects.join(" UNION ALL ")),
        table.rows.iter().flatten().cloned().collect(),
    ))
}

fn require_alias(table: &RecordTable) -> Result<&str, SqlFxError> {
    table
        .alias
        .as_deref()
        .ok_or_else(|| SqlFxError::CompileError("update helper requires an alias".to_string()))
}

fn render_custom(
    dialect: Dialect,
    segment: &CustomSegment,
    placeholders: &mut Placeholders<'_>,
) -> Result<Rendered, SqlFxError> {
    match segment.kind.as_str() {
        CustomSegment::JSON => {
            let [value] = segment.payload.as_slice() else {
                return Err(SqlFxError::CompileError(format!(
                    "json segment takes exactly one value, got {}",
                    segment.payload.len()
                )));
            };
            let placeholder = placeholders.next_placeholder();
            let sql = match dialect {
                Dialect::Postgres => format!("{placeholder}::jsonb"),
                Dialect::Mysql => format!("CAST({placeholder} AS JSON)"),
                Dialect::Sqlite => format!("json({placeholder})"),
                Dialect::Mssql => placeholder,
            };
            Ok((sql, vec![value.clone()]))
        }
        CustomSegment::ARRAY if dialect == Dialect::Postgres => {
            if segment.payload.is_empty() {
                return Ok(("'{}'".to_string(), Vec::new()));
            }
            let list: Vec<String> = segment
                .payload
                .iter()
                .map(|_| placeholders.next_placeholder())
                .collect();
            Ok((format!("ARRAY[{}]", list.join(",")), segment.payload.clone()))
        }
        kind => Err(SqlFxError::CompileError(format!(
            "custom segment kind \"{kind}\" is not supported by the {} dialect",
            dialect.name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{array_literal, ident, json, update};
    use crate::{record, sql};

    #[test]
    fn escaping_quotes_each_dotted_part() {
        for dialect in [
            Dialect::Postgres,
            Dialect::Mysql,
            Dialect::Mssql,
            Dialect::Sqlite,
        ] {
            let compiler = dialect.compiler();
            assert_ne!(
                compiler.escape_identifier("a.b"),
                compiler.escape_identifier("a_b"),
                "{dialect:?}"
            );
        }

        assert_eq!(quote_identifier("public.users", '"', '"'), "\"public\".\"users\"");
        assert_eq!(quote_identifier("we\"ird", '"', '"'), "\"we\"\"ird\"");
        assert_eq!(quote_identifier("odd`name", '`', '`'), "`odd``name`");
        assert_eq!(quote_identifier("dbo.t]x", '[', ']'), "[dbo].[t]]x]");
    }

    #[test]
    fn placeholders_follow_the_dialect() {
        let fragment = sql!("SELECT * FROM {} WHERE a = {} AND b = {}", ident("t"), 1, 2);
        assert_eq!(
            Compiler::postgres().compile(&fragment).unwrap().sql,
            "SELECT * FROM \"t\" WHERE a = $1 AND b = $2"
        );
        assert_eq!(
            Compiler::mysql().compile(&fragment).unwrap().sql,
            "SELECT * FROM `t` WHERE a = ? AND b = ?"
        );
        assert_eq!(
            Compiler::mssql().compile(&fragment).unwrap().sql,
            "SELECT * FROM [t] WHERE a = @a AND b = @b"
        );
        assert_eq!(
            Compiler::sqlite().compile(&fragment).unwrap().sql,
            "SELECT * FROM \"t\" WHERE a = ? AND b = ?"
        );
    }

    #[test]
    fn update_helper_uses_a_values_table_on_postgres() {
        let rows = [
            record! { "id" => 1, "name" => "a" },
            record! { "id" => 2, "name" => "b" },
        ];
        let fragment = sql!(
            "UPDATE people SET name = u.name FROM {} WHERE people.id = u.id",
            update(rows, "u")
        );
        let compiled = Compiler::postgres().compile(&fragment).unwrap();
        assert_eq!(
            compiled.sql,
            "UPDATE people SET name = u.name FROM (values ($1,$2),($3,$4)) AS \"u\"(\"id\",\"name\") WHERE people.id = u.id"
        );
        assert_eq!(compiled.params.len(), 4);
    }

    #[test]
    fn update_helper_uses_a_union_on_mysql() {
        let rows = [
            record! { "id" => 1, "name" => "a" },
            record! { "id" => 2, "name" => "b" },
        ];
        let compiled = Compiler::mysql()
            .compile(&sql!("{}", update(rows, "u")))
            .unwrap();
        assert_eq!(
            compiled.sql,
            "(SELECT ? AS `id`, ? AS `name` UNION ALL SELECT ?, ?) AS `u`"
        );
        assert_eq!(
            compiled.params,
            vec![
                Value::Int(1),
                Value::from("a"),
                Value::Int(2),
                Value::from("b")
            ]
        );
    }

    #[test]
    fn json_and_array_custom_segments() {
        let payload = serde_json::json!({ "tags": ["x"] });
        let fragment = sql!(
            "INSERT INTO docs (body, ids) VALUES ({}, {})",
            json(payload.clone()),
            array_literal([1, 2])
        );
        let compiled = Compiler::postgres().compile(&fragment).unwrap();
        assert_eq!(
            compiled.sql,
            "INSERT INTO docs (body, ids) VALUES ($1::jsonb, ARRAY[$2,$3])"
        );
        assert_eq!(
            compiled.params,
            vec![Value::Json(payload), Value::Int(1), Value::Int(2)]
        );

        assert!(matches!(
            Compiler::mysql().compile(&sql!("{}", array_literal([1]))),
            Err(SqlFxError::CompileError(_))
        ));
        assert_eq!(
            Compiler::sqlite()
                .compile(&sql!("{}", json(serde_json::json!(1))))
                .unwrap()
                .sql,
            "json(?)"
        );
    }
}
