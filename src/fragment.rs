//! Composable SQL fragments.
//!
//! A [`Fragment`] is an ordered list of [`Segment`]s. Fragments are built from raw SQL text
//! plus typed holes; splicing one fragment into another inlines its segments, so the
//! parameter order of the final statement is always the left-to-right order of its holes.
//!
//! ```rust
//! use sqlfx::prelude::*;
//!
//! let filter = sql!("age > {}", 18);
//! let query = sql!("SELECT * FROM {} WHERE {} AND id IN {}", ident("people"), filter, array([1, 2, 3]));
//! let compiled = Compiler::postgres().compile(&query).unwrap();
//! assert_eq!(
//!     compiled.sql,
//!     "SELECT * FROM \"people\" WHERE age > $1 AND id IN ($2,$3,$4)"
//! );
//! ```

mod segment;
mod statement;
mod template;

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

pub use segment::{
    ArrayHelper, CustomSegment, Identifier, InsertHelper, Record, Segment, UpdateHelper,
};
pub use statement::{Compiled, Statement};

use crate::types::Value;

/// Build a fragment from a format-style template: each `{}` hole takes one argument.
///
/// Fragments are spliced in place, helpers ([`ident`], [`array`], [`insert`], [`update`],
/// [`custom`]) keep their meaning, and any other value becomes one bound parameter.
#[macro_export]
macro_rules! sql {
    ($template:literal $(, $arg:expr)* $(,)?) => {
        $crate::fragment::Fragment::template(
            $template,
            ::std::vec![$($crate::fragment::Interpolate::into_interpolation($arg)),*],
        )
    };
}

/// Build a [`Record`] from `column => value` pairs.
#[macro_export]
macro_rules! record {
    ($($column:expr => $value:expr),* $(,)?) => {{
        let mut record = $crate::fragment::Record::new();
        $(record.insert(::std::string::String::from($column), $crate::types::Value::from($value));)*
        record
    }};
}

/// An ordered, splice-safe sequence of segments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    segments: Vec<Segment>,
}

/// What a template hole turns into.
#[derive(Debug, Clone, PartialEq)]
pub enum Interpolation {
    /// Inlined segment by segment.
    Fragment(Fragment),
    /// Pushed as exactly one segment.
    Segment(Segment),
}

/// Anything that can fill a template hole.
pub trait Interpolate {
    fn into_interpolation(self) -> Interpolation;
}

impl Fragment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragment made of one literal piece of SQL.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::literal(sql)],
        }
    }

    /// Literal SQL carrying already-bound parameters, e.g. text produced by an earlier compile.
    pub fn raw_with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            segments: vec![Segment::Literal {
                sql: sql.into(),
                params,
            }],
        }
    }

    #[must_use]
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Interleave literal template pieces with interpolated arguments.
    ///
    /// Prefer the [`sql!`](crate::sql) macro, which calls this.
    ///
    /// # Panics
    /// Panics when the number of `{}` holes differs from the number of arguments, which
    /// is a programming error in the calling code.
    #[must_use]
    pub fn template(template: &str, args: Vec<Interpolation>) -> Self {
        let pieces = template::split_template(template);
        assert_eq!(
            pieces.len(),
            args.len() + 1,
            "sql template {template:?} has {} holes but {} arguments were supplied",
            pieces.len() - 1,
            args.len()
        );

        let mut fragment = Fragment::new();
        let mut pieces = pieces.into_iter();
        if let Some(first) = pieces.next() {
            fragment = fragment.push_sql(first);
        }
        for (arg, piece) in args.into_iter().zip(pieces) {
            fragment = fragment.push_interpolation(arg).push_sql(piece);
        }
        fragment
    }

    /// Append literal SQL. Empty text adds nothing.
    #[must_use]
    pub fn push_sql(mut self, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        if !sql.is_empty() {
            self.segments.push(Segment::literal(sql));
        }
        self
    }

    /// Append an interpolated value, helper, or fragment.
    #[must_use]
    pub fn push(self, value: impl Interpolate) -> Self {
        self.push_interpolation(value.into_interpolation())
    }

    fn push_interpolation(mut self, interpolation: Interpolation) -> Self {
        match interpolation {
            Interpolation::Fragment(fragment) => self.segments.extend(fragment.segments),
            Interpolation::Segment(segment) => self.segments.push(segment),
        }
        self
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[must_use]
    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Join fragments with a literal separator.
    pub fn join(separator: &str, fragments: impl IntoIterator<Item = Fragment>) -> Fragment {
        let mut out = Fragment::new();
        for (i, fragment) in fragments.into_iter().enumerate() {
            if i > 0 {
                out = out.push_sql(separator);
            }
            out.segments.extend(fragment.segments);
        }
        out
    }

    /// `(a AND b AND ...)`, or `1=1` when there are no clauses.
    pub fn and(clauses: impl IntoIterator<Item = Fragment>) -> Fragment {
        Self::wrap_clauses(" AND ", clauses)
    }

    /// `(a OR b OR ...)`, or `1=1` when there are no clauses.
    pub fn or(clauses: impl IntoIterator<Item = Fragment>) -> Fragment {
        Self::wrap_clauses(" OR ", clauses)
    }

    fn wrap_clauses(separator: &str, clauses: impl IntoIterator<Item = Fragment>) -> Fragment {
        let joined = Self::join(separator, clauses);
        if joined.is_empty() {
            Fragment::raw("1=1")
        } else {
            Fragment::raw("(").push(joined).push_sql(")")
        }
    }

    /// Comma-separated list.
    pub fn csv(parts: impl IntoIterator<Item = Fragment>) -> Fragment {
        Self::join(", ", parts)
    }

    /// Comma-separated list after `prefix` (e.g. `ORDER BY`); empty when there are no parts.
    pub fn csv_with_prefix(prefix: &str, parts: impl IntoIterator<Item = Fragment>) -> Fragment {
        let list = Self::csv(parts);
        if list.is_empty() {
            list
        } else {
            Fragment::raw(format!("{prefix} ")).push(list)
        }
    }
}

/// Identifier hole: escaped with the dialect's quoting rules.
pub fn ident(name: impl Into<String>) -> Identifier {
    Identifier(name.into())
}

/// List hole rendered as `(p,p,...)`.
pub fn array<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> ArrayHelper {
    ArrayHelper(values.into_iter().map(Into::into).collect())
}

/// Insert hole rendered as `(cols) VALUES (...),(...)`.
pub fn insert(rows: impl IntoIterator<Item = Record>) -> InsertHelper {
    InsertHelper(rows.into_iter().collect())
}

/// Values-table hole for `UPDATE ... FROM`.
pub fn update(rows: impl IntoIterator<Item = Record>, alias: impl Into<String>) -> UpdateHelper {
    UpdateHelper {
        rows: rows.into_iter().collect(),
        alias: alias.into(),
    }
}

/// Dialect escape hatch.
pub fn custom(kind: impl Into<String>, payload: Vec<Value>) -> CustomSegment {
    CustomSegment::new(kind, payload)
}

/// One JSON parameter, cast the way the dialect expects.
pub fn json(value: JsonValue) -> CustomSegment {
    CustomSegment::new(CustomSegment::JSON, vec![Value::Json(value)])
}

/// Inline array literal, e.g. `ARRAY[$1,$2]` on Postgres.
pub fn array_literal<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> CustomSegment {
    CustomSegment::new(
        CustomSegment::ARRAY,
        values.into_iter().map(Into::into).collect(),
    )
}

/// Build a record from `(column, value)` pairs.
pub fn record<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Record
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

impl Interpolate for Fragment {
    fn into_interpolation(self) -> Interpolation {
        Interpolation::Fragment(self)
    }
}

impl Interpolate for &Fragment {
    fn into_interpolation(self) -> Interpolation {
        Interpolation::Fragment(self.clone())
    }
}

impl Interpolate for Segment {
    fn into_interpolation(self) -> Interpolation {
        Interpolation::Segment(self)
    }
}

macro_rules! interpolate_as_segment {
    ($($ty:ty),*) => {
        $(
            impl Interpolate for $ty {
                fn into_interpolation(self) -> Interpolation {
                    Interpolation::Segment(Segment::from(self))
                }
            }
        )*
    };
}

interpolate_as_segment!(Identifier, ArrayHelper, InsertHelper, UpdateHelper, CustomSegment);

macro_rules! interpolate_as_parameter {
    ($($ty:ty),*) => {
        $(
            impl Interpolate for $ty {
                fn into_interpolation(self) -> Interpolation {
                    Interpolation::Segment(Segment::Parameter(Value::from(self)))
                }
            }
        )*
    };
}

interpolate_as_parameter!(
    Value,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f32,
    f64,
    bool,
    String,
    &str,
    &String,
    NaiveDateTime,
    JsonValue,
    Vec<u8>
);

impl<T: Into<Value>> Interpolate for Option<T> {
    fn into_interpolation(self) -> Interpolation {
        Interpolation::Segment(Segment::Parameter(Value::from(self)))
    }
}
