//! Row mapping and row-selection policy.

use std::fmt;

use serde::Deserialize;

use crate::driver::{FieldValue, RawRow};
use crate::error::ScanError;

/// Declared type of one column in a family's schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Int,
}

impl ColumnType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Int => "integer",
        }
    }
}

/// One column of the fixed query contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

impl Column {
    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::Text,
        }
    }

    pub const fn int(name: &'static str) -> Self {
        Self {
            name,
            ty: ColumnType::Int,
        }
    }
}

/// Converts raw rows into a typed record of a fixed schema.
pub trait RowMapper {
    type Record: Send + fmt::Debug;

    /// Column order and types the statement must produce.
    fn columns(&self) -> &'static [Column];

    fn scan(&self, row: &RawRow) -> Result<Self::Record, ScanError>;
}

/// Checked access to a row against a schema.
pub struct SchemaRow<'r> {
    row: &'r RawRow,
    columns: &'static [Column],
}

impl<'r> SchemaRow<'r> {
    /// Fails with [`ScanError::Arity`] if the column count differs.
    pub fn check(row: &'r RawRow, columns: &'static [Column]) -> Result<Self, ScanError> {
        if row.len() != columns.len() {
            return Err(ScanError::Arity {
                expected: columns.len(),
                actual: row.len(),
            });
        }
        Ok(Self { row, columns })
    }

    fn field(&self, idx: usize, want: ColumnType) -> Result<(&'r FieldValue, &'static str), ScanError> {
        let arity = || ScanError::Arity {
            expected: self.columns.len(),
            actual: self.row.len(),
        };
        let column = *self.columns.get(idx).ok_or_else(arity)?;
        let value = self.row.get(idx).ok_or_else(arity)?;
        if column.ty != want {
            return Err(ScanError::Type {
                column: column.name,
                expected: want.as_str(),
                found: column.ty.as_str(),
            });
        }
        if *value == FieldValue::Null {
            return Err(ScanError::Null {
                column: column.name,
            });
        }
        Ok((value, column.name))
    }

    pub fn text(&self, idx: usize) -> Result<String, ScanError> {
        match self.field(idx, ColumnType::Text)? {
            (FieldValue::Text(s), _) => Ok(s.clone()),
            (other, column) => Err(ScanError::Type {
                column,
                expected: "text",
                found: other.type_name(),
            }),
        }
    }

    pub fn int(&self, idx: usize) -> Result<i64, ScanError> {
        match self.field(idx, ColumnType::Int)? {
            (FieldValue::Int(v), _) => Ok(*v),
            (other, column) => Err(ScanError::Type {
                column,
                expected: "integer",
                found: other.type_name(),
            }),
        }
    }
}

/// Which scanned record determines the scrape's tags and values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowPolicy {
    /// The latest row wins; the full cursor is scanned and earlier rows
    /// are discarded.
    #[default]
    Latest,
    /// At most one row is allowed; a second row fails the scrape.
    Single,
}

/// What a scrape does when the cursor yields no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyResultPolicy {
    /// Record nothing and report an empty outcome.
    #[default]
    Skip,
    /// Fail the scrape with an empty-result error.
    Fail,
}

/// Applies a [`RowPolicy`] to a stream of scanned records.
#[derive(Debug)]
pub struct RowSelector<R> {
    policy: RowPolicy,
    current: Option<R>,
    seen: usize,
}

impl<R> RowSelector<R> {
    pub fn new(policy: RowPolicy) -> Self {
        Self {
            policy,
            current: None,
            seen: 0,
        }
    }

    pub fn accept(&mut self, record: R) -> Result<(), ScanError> {
        self.seen += 1;
        if self.policy == RowPolicy::Single && self.seen > 1 {
            return Err(ScanError::UnexpectedRows { count: self.seen });
        }
        self.current = Some(record);
        Ok(())
    }

    pub fn seen(&self) -> usize {
        self.seen
    }

    /// The selected record, `None` if no rows were accepted.
    pub fn finish(self) -> Option<R> {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &[Column] = &[Column::text("HOST"), Column::int("TOTAL_SIZE")];

    fn row(values: Vec<FieldValue>) -> RawRow {
        RawRow::new(values)
    }

    #[test]
    fn schema_row_reads_typed_fields() {
        let r = row(vec!["h1".into(), 1000i64.into()]);
        let checked = SchemaRow::check(&r, SCHEMA).unwrap();
        assert_eq!(checked.text(0).unwrap(), "h1");
        assert_eq!(checked.int(1).unwrap(), 1000);
    }

    #[test]
    fn arity_mismatch() {
        let r = row(vec!["h1".into()]);
        assert_eq!(
            SchemaRow::check(&r, SCHEMA).err(),
            Some(ScanError::Arity { expected: 2, actual: 1 })
        );
    }

    #[test]
    fn index_past_schema_is_arity_error() {
        let r = row(vec!["h1".into(), 1000i64.into()]);
        let checked = SchemaRow::check(&r, SCHEMA).unwrap();
        assert_eq!(checked.text(2), Err(ScanError::Arity { expected: 2, actual: 2 }));
        assert_eq!(checked.int(9), Err(ScanError::Arity { expected: 2, actual: 2 }));
    }

    #[test]
    fn null_in_integer_column() {
        let r = row(vec!["h1".into(), FieldValue::Null]);
        let checked = SchemaRow::check(&r, SCHEMA).unwrap();
        assert_eq!(checked.int(1), Err(ScanError::Null { column: "TOTAL_SIZE" }));
    }

    #[test]
    fn type_mismatch() {
        let r = row(vec![7i64.into(), "big".into()]);
        let checked = SchemaRow::check(&r, SCHEMA).unwrap();
        assert_eq!(
            checked.text(0),
            Err(ScanError::Type {
                column: "HOST",
                expected: "text",
                found: "integer"
            })
        );
        assert!(matches!(checked.int(1), Err(ScanError::Type { .. })));
        // Reading a column as the wrong schema type is also a mismatch.
        assert!(matches!(checked.int(0), Err(ScanError::Type { .. })));
    }

    #[test]
    fn latest_policy_keeps_last_record() {
        let mut selector = RowSelector::new(RowPolicy::Latest);
        for r in ["R1", "R2", "R3"] {
            selector.accept(r).unwrap();
        }
        assert_eq!(selector.seen(), 3);
        assert_eq!(selector.finish(), Some("R3"));
    }

    #[test]
    fn single_policy_rejects_second_row() {
        let mut selector = RowSelector::new(RowPolicy::Single);
        selector.accept(1).unwrap();
        assert_eq!(selector.accept(2), Err(ScanError::UnexpectedRows { count: 2 }));
    }

    #[test]
    fn empty_selector_yields_nothing() {
        let selector: RowSelector<u8> = RowSelector::new(RowPolicy::Latest);
        assert_eq!(selector.finish(), None);
    }
}
