//! Driver abstraction.
//!
//! A [`Driver`] opens [`Connection`]s; a connection executes a read-only
//! statement and returns a single-pass [`RowCursor`]. Rows are handed to
//! the pipeline as driver-neutral [`RawRow`]s.

use std::future::Future;

use crate::error::DriverError;
use crate::target::Target;

/// One decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// A row in the order returned by the database.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRow {
    values: Vec<FieldValue>,
}

impl RawRow {
    pub fn new(values: Vec<FieldValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&FieldValue> {
        self.values.get(idx)
    }
}

impl FromIterator<FieldValue> for RawRow {
    fn from_iter<I: IntoIterator<Item = FieldValue>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Opens connections to targets.
pub trait Driver: Send + Sync + 'static {
    type Conn: Connection;

    /// Short driver name for logs and span attributes.
    fn name(&self) -> &str;

    fn open(&self, target: &Target) -> impl Future<Output = Result<Self::Conn, DriverError>> + Send;
}

/// An open connection, exclusively owned by one scrape.
pub trait Connection: Send + 'static {
    type Cursor<'c>: RowCursor + 'c
    where
        Self: 'c;

    /// Execute a read-only statement. Rows are produced lazily by the cursor.
    fn query<'c>(
        &'c mut self,
        statement: &'c str,
    ) -> impl Future<Output = Result<Self::Cursor<'c>, DriverError>> + Send + 'c;

    fn close(self) -> impl Future<Output = Result<(), DriverError>> + Send;
}

/// Stateful, single-pass row iterator.
pub trait RowCursor: Send {
    /// Next row, `None` once exhausted.
    fn next_row(&mut self) -> impl Future<Output = Option<Result<RawRow, DriverError>>> + Send;
}
