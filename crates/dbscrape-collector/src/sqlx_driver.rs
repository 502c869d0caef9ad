//! Production driver backed by `sqlx::AnyConnection`.
//!
//! The DSN scheme selects the backend (`postgres`, `mysql`, `sqlite`).
//! Columns are decoded into [`FieldValue`]s by trying integer, float and
//! text decodings in that order; NULLs are detected before decoding.

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Connection as _, Row, ValueRef};
use tracing::debug;

use crate::driver::{Connection, Driver, FieldValue, RawRow, RowCursor};
use crate::error::DriverError;
use crate::target::Target;

/// Opens `AnyConnection`s for one DSN scheme.
#[derive(Debug, Clone)]
pub struct SqlxDriver {
    scheme: String,
}

impl SqlxDriver {
    pub fn new(scheme: &str) -> Self {
        sqlx::any::install_default_drivers();
        Self {
            scheme: scheme.to_string(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }
}

impl Driver for SqlxDriver {
    type Conn = SqlxConnection;

    fn name(&self) -> &str {
        &self.scheme
    }

    async fn open(&self, target: &Target) -> Result<SqlxConnection, DriverError> {
        let dsn = target
            .dsn(&self.scheme)
            .map_err(|e| DriverError::ConnectionFailed(e.to_string()))?;
        let conn = AnyConnection::connect(&dsn)
            .await
            .map_err(|e| DriverError::ConnectionFailed(e.to_string()))?;
        debug!(%target, scheme = %self.scheme, "database connection established");
        Ok(SqlxConnection { conn })
    }
}

/// One open `AnyConnection`.
pub struct SqlxConnection {
    conn: AnyConnection,
}

impl std::fmt::Debug for SqlxConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxConnection").finish_non_exhaustive()
    }
}

impl Connection for SqlxConnection {
    type Cursor<'c> = SqlxCursor<'c>;

    async fn query<'c>(&'c mut self, statement: &'c str) -> Result<SqlxCursor<'c>, DriverError> {
        let rows = sqlx::query(statement).fetch(&mut self.conn);
        Ok(SqlxCursor { rows })
    }

    async fn close(self) -> Result<(), DriverError> {
        self.conn
            .close()
            .await
            .map_err(|e| DriverError::CloseFailed(e.to_string()))
    }
}

/// Streaming cursor over an executing statement.
pub struct SqlxCursor<'c> {
    rows: BoxStream<'c, Result<AnyRow, sqlx::Error>>,
}

impl RowCursor for SqlxCursor<'_> {
    async fn next_row(&mut self) -> Option<Result<RawRow, DriverError>> {
        let row = match self.rows.next().await? {
            Ok(row) => row,
            Err(e) => return Some(Err(DriverError::QueryFailed(e.to_string()))),
        };
        Some(decode_row(&row))
    }
}

fn decode_row(row: &AnyRow) -> Result<RawRow, DriverError> {
    let mut values = Vec::with_capacity(row.len());
    for idx in 0..row.len() {
        let is_null = row
            .try_get_raw(idx)
            .map_err(|e| DriverError::Decode(e.to_string()))?
            .is_null();
        if is_null {
            values.push(FieldValue::Null);
            continue;
        }

        let value = if let Ok(v) = row.try_get::<i64, _>(idx) {
            FieldValue::Int(v)
        } else if let Ok(v) = row.try_get::<f64, _>(idx) {
            FieldValue::Float(v)
        } else if let Ok(v) = row.try_get::<String, _>(idx) {
            FieldValue::Text(v)
        } else {
            return Err(DriverError::Decode(format!(
                "column {idx} has an unsupported type"
            )));
        };
        values.push(value);
    }
    Ok(RawRow::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_target_fails_to_open() {
        let driver = SqlxDriver::new("postgres");
        let target = Target::new("127.0.0.1:1", "user", "pass");
        let err = driver.open(&target).await.unwrap_err();
        assert!(matches!(err, DriverError::ConnectionFailed(_)));
    }

    #[test]
    fn driver_name_is_scheme() {
        let driver = SqlxDriver::new("mysql");
        assert_eq!(driver.name(), "mysql");
        assert_eq!(driver.scheme(), "mysql");
    }
}
