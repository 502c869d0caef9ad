//! Connection lifecycle for one scrape.
//!
//! [`ConnectionManager::open`] yields a [`ManagedConnection`], which
//! releases the underlying connection exactly once: explicitly through
//! [`ManagedConnection::close`], or, if the scrape future is dropped
//! before that (deadline or caller cancellation), from `Drop` on the
//! current runtime. Both paths bound the driver's close by the close
//! deadline and drop the connection unclosed when it expires.

use std::fmt;
use std::time::Duration;

use tracing::{Instrument, debug, warn};

use dbscrape_trace::{SpanRef, TraceSpan};

use crate::driver::{Connection, Driver, RawRow, RowCursor};
use crate::error::{CloseError, ConnectionError, QueryError};
use crate::target::Target;

/// Opens traced connections with a deadline.
#[derive(Debug)]
pub struct ConnectionManager<D: Driver> {
    driver: D,
    open_timeout: Duration,
    close_timeout: Duration,
}

impl<D: Driver> ConnectionManager<D> {
    pub fn new(driver: D, open_timeout: Duration, close_timeout: Duration) -> Self {
        Self {
            driver,
            open_timeout,
            close_timeout,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Open a connection under a `sql_open_db_conn` child of `parent`.
    pub async fn open(
        &self,
        target: &Target,
        parent: &TraceSpan,
    ) -> Result<ManagedConnection<D::Conn>, ConnectionError> {
        let mut span = parent.child("sql_open_db_conn");
        span.set_attribute("db.system", self.driver.name());
        span.set_attribute("db.target", target);

        let result = self
            .connect(target)
            .instrument(span.tracing_span().clone())
            .await;

        match result {
            Ok(conn) => {
                debug!(%target, "connection opened");
                let handle = span.handle();
                span.end();
                Ok(ManagedConnection {
                    conn: Some(conn),
                    target: target.to_string(),
                    open_span: handle,
                    close_timeout: self.close_timeout,
                })
            }
            Err(e) => {
                warn!(%target, error = %e, "connection failed");
                span.set_error(&e);
                span.end();
                Err(e)
            }
        }
    }

    async fn connect(&self, target: &Target) -> Result<D::Conn, ConnectionError> {
        target.validate()?;
        match tokio::time::timeout(self.open_timeout, self.driver.open(target)).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(source)) => Err(ConnectionError::Driver {
                target: target.to_string(),
                source,
            }),
            Err(_) => Err(ConnectionError::Timeout {
                target: target.to_string(),
                timeout: self.open_timeout,
            }),
        }
    }
}

/// A connection owned by one scrape.
pub struct ManagedConnection<C: Connection> {
    conn: Option<C>,
    target: String,
    open_span: SpanRef,
    close_timeout: Duration,
}

impl<C: Connection> fmt::Debug for ManagedConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("target", &self.target)
            .field("closed", &self.conn.is_none())
            .finish()
    }
}

impl<C: Connection> ManagedConnection<C> {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Execute `statement`. The returned cursor carries the
    /// `sql_query_<family>` span, a child of the open span, which stays
    /// open until the cursor is finished or dropped.
    pub async fn query<'c>(
        &'c mut self,
        statement: &'c str,
        family: &str,
    ) -> Result<QueryCursor<'c, C>, QueryError> {
        let mut span = self.open_span.child(format!("sql_query_{family}"));
        span.set_attribute("db.statement", statement);

        let Some(conn) = self.conn.as_mut() else {
            span.set_error(QueryError::Closed);
            return Err(QueryError::Closed);
        };

        match conn
            .query(statement)
            .instrument(span.tracing_span().clone())
            .await
        {
            Ok(cursor) => Ok(QueryCursor {
                cursor,
                span,
                rows: 0,
            }),
            Err(e) => {
                span.set_error(&e);
                Err(e.into())
            }
        }
    }

    /// Release the connection within the close deadline. Later calls are
    /// no-ops.
    pub async fn close(&mut self) -> Result<(), CloseError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        let result = close_within(conn, self.close_timeout).await;
        debug!(db.target = %self.target, ok = result.is_ok(), "connection closed");
        result
    }
}

async fn close_within<C: Connection>(conn: C, timeout: Duration) -> Result<(), CloseError> {
    match tokio::time::timeout(timeout, conn.close()).await {
        Ok(result) => result.map_err(CloseError::from),
        Err(_) => Err(CloseError::Timeout { timeout }),
    }
}

impl<C: Connection> Drop for ManagedConnection<C> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        warn!(db.target = %self.target, "connection dropped before close");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let target = std::mem::take(&mut self.target);
                let timeout = self.close_timeout;
                handle.spawn(async move {
                    if let Err(e) = close_within(conn, timeout).await {
                        warn!(db.target = %target, error = %e, "background close failed");
                    }
                });
            }
            // No runtime to close on; the driver releases the socket on drop.
            Err(_) => drop(conn),
        }
    }
}

/// Rows of an executing statement plus the span bracketing the
/// query-and-iterate phase.
pub struct QueryCursor<'c, C: Connection + 'c> {
    cursor: C::Cursor<'c>,
    span: TraceSpan,
    rows: usize,
}

impl<'c, C: Connection + 'c> QueryCursor<'c, C> {
    pub fn span(&self) -> &TraceSpan {
        &self.span
    }

    /// Rows yielded so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub async fn next_row(&mut self) -> Option<Result<RawRow, QueryError>> {
        match self.cursor.next_row().await {
            Some(Ok(row)) => {
                self.rows += 1;
                Some(Ok(row))
            }
            Some(Err(e)) => {
                self.span.set_error(&e);
                Some(Err(e.into()))
            }
            None => None,
        }
    }

    /// Mark the query span as failed without ending it.
    pub fn fail(&mut self, error: impl fmt::Display) {
        self.span.set_error(error);
    }

    /// Drop the cursor and end the query span.
    pub fn finish(self) {
        let Self {
            cursor,
            mut span,
            rows,
        } = self;
        drop(cursor);
        span.set_attribute("db.rows", rows);
        span.end();
    }
}
