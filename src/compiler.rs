//! Fragment → (SQL text, parameters).
//!
//! A [`Compiler`] is five hooks and nothing else: placeholder rendering, identifier
//! escaping, the update values-table renderer, the custom-segment renderer, and an optional
//! insert renderer. Presets for the supported dialects live in [`dialect`].

pub mod dialect;
mod placeholder;

use std::fmt;
use std::sync::Arc;

pub use dialect::Dialect;
pub use placeholder::{PlaceholderStyle, Placeholders};

use crate::error::SqlFxError;
use crate::fragment::{Compiled, CustomSegment, Fragment, Record, Segment};
use crate::types::Value;

/// SQL text plus the parameters it binds, returned by dialect hooks.
pub type Rendered = (String, Vec<Value>);

pub type PlaceholderFn = Arc<dyn Fn(usize) -> String + Send + Sync>;
pub type EscapeFn = Arc<dyn Fn(&str) -> String + Send + Sync>;
pub type RecordsRenderer =
    Arc<dyn Fn(&RecordTable, &mut Placeholders<'_>) -> Result<Rendered, SqlFxError> + Send + Sync>;
pub type CustomRenderer = Arc<
    dyn Fn(&CustomSegment, &mut Placeholders<'_>) -> Result<Rendered, SqlFxError> + Send + Sync,
>;

/// Normalized rows of a record helper, handed to the insert/update hooks.
///
/// Column names and the alias are already escaped; every row has one value per column.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub alias: Option<String>,
}

/// Dialect-specific renderer from [`Fragment`] to [`Compiled`].
#[derive(Clone)]
pub struct Compiler {
    name: String,
    placeholder: PlaceholderFn,
    escape: EscapeFn,
    update_table: RecordsRenderer,
    custom: CustomRenderer,
    insert: Option<RecordsRenderer>,
    strict_records: bool,
}

impl fmt::Debug for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compiler")
            .field("name", &self.name)
            .field("custom_insert", &self.insert.is_some())
            .field("strict_records", &self.strict_records)
            .finish_non_exhaustive()
    }
}

impl Compiler {
    /// Compiler with the given placeholder and escaping hooks.
    ///
    /// Update helpers default to the `(values ...) AS alias(cols)` form and custom segments
    /// are rejected until [`with_custom`](Self::with_custom) installs a handler.
    pub fn new<P, E>(placeholder: P, escape: E) -> Self
    where
        P: Fn(usize) -> String + Send + Sync + 'static,
        E: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            name: "custom".to_string(),
            placeholder: Arc::new(placeholder),
            escape: Arc::new(escape),
            update_table: Arc::new(dialect::render_values_table),
            custom: Arc::new(|segment: &CustomSegment, _: &mut Placeholders<'_>| {
                Err(SqlFxError::CompileError(format!(
                    "no handler for custom segment kind \"{}\"",
                    segment.kind
                )))
            }),
            insert: None,
            strict_records: false,
        }
    }

    #[must_use]
    pub fn postgres() -> Self {
        Dialect::Postgres.compiler()
    }

    #[must_use]
    pub fn mysql() -> Self {
        Dialect::Mysql.compiler()
    }

    #[must_use]
    pub fn mssql() -> Self {
        Dialect::Mssql.compiler()
    }

    #[must_use]
    pub fn sqlite() -> Self {
        Dialect::Sqlite.compiler()
    }

    /// Name used in logs and error messages.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_update_table<F>(mut self, render: F) -> Self
    where
        F: Fn(&RecordTable, &mut Placeholders<'_>) -> Result<Rendered, SqlFxError>
            + Send
            + Sync
            + 'static,
    {
        self.update_table = Arc::new(render);
        self
    }

    #[must_use]
    pub fn with_custom<F>(mut self, render: F) -> Self
    where
        F: Fn(&CustomSegment, &mut Placeholders<'_>) -> Result<Rendered, SqlFxError>
            + Send
            + Sync
            + 'static,
    {
        self.custom = Arc::new(render);
        self
    }

    /// Replace the default `(cols) VALUES ...` rendering, e.g. to add `RETURNING`/`OUTPUT`.
    #[must_use]
    pub fn with_insert<F>(mut self, render: F) -> Self
    where
        F: Fn(&RecordTable, &mut Placeholders<'_>) -> Result<Rendered, SqlFxError>
            + Send
            + Sync
            + 'static,
    {
        self.insert = Some(Arc::new(render));
        self
    }

    /// Reject record rows whose keys differ from the first row instead of binding `NULL`.
    #[must_use]
    pub fn with_strict_records(mut self, strict: bool) -> Self {
        self.strict_records = strict;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placeholder for the 1-based parameter `index`.
    #[must_use]
    pub fn placeholder(&self, index: usize) -> String {
        (self.placeholder)(index)
    }

    #[must_use]
    pub fn escape_identifier(&self, name: &str) -> String {
        (self.escape)(name)
    }

    /// Render `fragment` to SQL text and its parameters.
    ///
    /// # Errors
    /// Returns `SqlFxError::CompileError` for empty record helpers, custom segments the
    /// dialect does not handle, and (in strict mode) heterogeneous record rows.
    pub fn compile(&self, fragment: &Fragment) -> Result<Compiled, SqlFxError> {
        let mut sql = String::new();
        let mut params = Vec::new();
        let mut placeholders = Placeholders::new(self.placeholder.as_ref());

        for segment in fragment.segments() {
            match segment {
                Segment::Literal {
                    sql: text,
                    params: bound,
                } => {
                    sql.push_str(text);
                    placeholders.skip(bound.len());
                    params.extend(bound.iter().cloned());
                }
                Segment::Identifier(name) => sql.push_str(&self.escape_identifier(name)),
                Segment::Parameter(value) => {
                    sql.push_str(&placeholders.next_placeholder());
                    params.push(value.clone());
                }
                Segment::ArrayHelper(values) => {
                    let list: Vec<String> = values
                        .iter()
                        .map(|_| placeholders.next_placeholder())
                        .collect();
                    sql.push('(');
                    sql.push_str(&list.join(","));
                    sql.push(')');
                    params.extend(values.iter().cloned());
                }
                Segment::RecordInsertHelper(rows) => {
                    let table = self.record_table(rows, None)?;
                    let (text, bound) = match &self.insert {
                        Some(render) => render(&table, &mut placeholders)?,
                        None => dialect::render_insert_values(&table, &mut placeholders)?,
                    };
                    sql.push_str(&text);
                    params.extend(bound);
                }
                Segment::RecordUpdateHelper { rows, alias } => {
                    let table = self.record_table(rows, Some(alias))?;
                    let (text, bound) = (self.update_table)(&table, &mut placeholders)?;
                    sql.push_str(&text);
                    params.extend(bound);
                }
                Segment::Custom(custom) => {
                    let (text, bound) = (self.custom)(custom, &mut placeholders)?;
                    sql.push_str(&text);
                    params.extend(bound);
                }
            }
        }

        Ok(Compiled { sql, params })
    }

    /// Columns come from the first row; missing keys bind `NULL` unless strict.
    fn record_table(&self, rows: &[Record], alias: Option<&str>) -> Result<RecordTable, SqlFxError> {
        let first = rows.first().ok_or_else(|| {
            SqlFxError::CompileError("record helper requires at least one row".to_string())
        })?;
        if first.is_empty() {
            return Err(SqlFxError::CompileError(
                "record helper rows must have at least one column".to_string(),
            ));
        }
        let names: Vec<&String> = first.keys().collect();

        let mut values = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            if self.strict_records
                && (row.len() != names.len() || names.iter().any(|name| !row.contains_key(*name)))
            {
                return Err(SqlFxError::CompileError(format!(
                    "record helper row {i} does not have the same columns as the first row"
                )));
            }
            values.push(
                names
                    .iter()
                    .map(|name| row.get(*name).cloned().unwrap_or(Value::Null))
                    .collect(),
            );
        }

        Ok(RecordTable {
            columns: names
                .iter()
                .map(|name| self.escape_identifier(name))
                .collect(),
            rows: values,
            alias: alias.map(|alias| self.escape_identifier(alias)),
        })
    }
}
