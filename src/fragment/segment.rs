use indexmap::IndexMap;

use crate::types::Value;

/// One row of a record helper: column name to value, in insertion order.
pub type Record = IndexMap<String, Value>;

/// One piece of a [`Fragment`](super::Fragment).
///
/// The compiler renders each variant with a single `match`; nothing else inspects them.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Raw SQL text, optionally carrying values that were bound when it was produced.
    Literal { sql: String, params: Vec<Value> },
    /// Table or column name, escaped at compile time.
    Identifier(String),
    /// One value bound positionally.
    Parameter(Value),
    /// A list rendered as `(p,p,...)`.
    ArrayHelper(Vec<Value>),
    /// Rows rendered as `(cols) VALUES (...),(...)`.
    RecordInsertHelper(Vec<Record>),
    /// Rows rendered as a dialect-specific values table named `alias`.
    RecordUpdateHelper { rows: Vec<Record>, alias: String },
    /// Dialect escape hatch handled by the compiler's custom hook.
    Custom(CustomSegment),
}

impl Segment {
    pub(crate) fn literal(sql: impl Into<String>) -> Self {
        Segment::Literal {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Opaque, dialect-specific segment.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomSegment {
    pub kind: String,
    pub payload: Vec<Value>,
}

impl CustomSegment {
    /// Kind rendered as one JSON parameter.
    pub const JSON: &'static str = "json";
    /// Kind rendered as an inline array literal with one parameter per element.
    pub const ARRAY: &'static str = "array";

    pub fn new(kind: impl Into<String>, payload: Vec<Value>) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Unescaped identifier; see [`ident`](super::ident).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier(pub String);

/// List of values; see [`array`](super::array).
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayHelper(pub Vec<Value>);

/// Rows to insert; see [`insert`](super::insert).
#[derive(Debug, Clone, PartialEq)]
pub struct InsertHelper(pub Vec<Record>);

/// Rows for `UPDATE ... FROM`; see [`update`](super::update).
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateHelper {
    pub rows: Vec<Record>,
    pub alias: String,
}

impl From<Identifier> for Segment {
    fn from(value: Identifier) -> Self {
        Segment::Identifier(value.0)
    }
}

impl From<ArrayHelper> for Segment {
    fn from(value: ArrayHelper) -> Self {
        Segment::ArrayHelper(value.0)
    }
}

impl From<InsertHelper> for Segment {
    fn from(value: InsertHelper) -> Self {
        Segment::RecordInsertHelper(value.0)
    }
}

impl From<UpdateHelper> for Segment {
    fn from(value: UpdateHelper) -> Self {
        Segment::RecordUpdateHelper {
            rows: value.rows,
            alias: value.alias,
        }
    }
}

impl From<CustomSegment> for Segment {
    fn from(value: CustomSegment) -> Self {
        Segment::Custom(value)
    }
}
