//! Error taxonomy of the scrape pipeline.

use std::time::Duration;

use thiserror::Error;

use dbscrape_metrics::{MetricsError, TagError};

use crate::phase::ScrapePhase;

/// Errors reported by a database driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("row decode failed: {0}")]
    Decode(String),

    #[error("close failed: {0}")]
    CloseFailed(String),
}

/// The target could not be reached or rejected the connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid target: {0}")]
    InvalidTarget(&'static str),

    #[error("connecting to {target} timed out after {timeout:?}")]
    Timeout { target: String, timeout: Duration },

    #[error("connecting to {target} failed: {source}")]
    Driver {
        target: String,
        #[source]
        source: DriverError,
    },
}

/// The statement was rejected or its execution failed.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query exceeded its deadline of {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("connection already closed")]
    Closed,

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Releasing a connection failed. Never fails a scrape on its own.
#[derive(Debug, Error)]
pub enum CloseError {
    #[error("close exceeded its deadline of {timeout:?}")]
    Timeout { timeout: Duration },

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// A row did not match the fixed schema of its metric family.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("expected {expected} columns, row has {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("column {column} is NULL")]
    Null { column: &'static str },

    #[error("column {column}: expected {expected}, found {found}")]
    Type {
        column: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("expected at most one row, cursor yielded {count}")]
    UnexpectedRows { count: usize },
}

/// Coarse classification of a scrape failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeErrorKind {
    Connection,
    Query,
    Scan,
    Tag,
    Record,
    EmptyResult,
}

impl ScrapeErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Query => "query",
            Self::Scan => "scan",
            Self::Tag => "tag",
            Self::Record => "record",
            Self::EmptyResult => "empty_result",
        }
    }
}

impl std::fmt::Display for ScrapeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying cause of a scrape failure.
#[derive(Debug, Error)]
pub enum ScrapeCause {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("tag insert failed: {0}")]
    Tag(#[from] TagError),

    #[error("recording failed: {0}")]
    Record(#[from] MetricsError),

    #[error("query returned no rows")]
    EmptyResult,
}

/// A failed scrape, as surfaced to the trigger caller.
#[derive(Debug, Error)]
#[error("scrape of {target} failed while {phase}: {cause}")]
pub struct ScrapeError {
    pub target: String,
    /// Phase the pipeline was in when the failure occurred.
    pub phase: ScrapePhase,
    #[source]
    pub cause: ScrapeCause,
}

impl ScrapeError {
    pub fn kind(&self) -> ScrapeErrorKind {
        match self.cause {
            ScrapeCause::Connection(_) => ScrapeErrorKind::Connection,
            ScrapeCause::Query(_) => ScrapeErrorKind::Query,
            ScrapeCause::Scan(_) => ScrapeErrorKind::Scan,
            ScrapeCause::Tag(_) => ScrapeErrorKind::Tag,
            ScrapeCause::Record(_) => ScrapeErrorKind::Record,
            ScrapeCause::EmptyResult => ScrapeErrorKind::EmptyResult,
        }
    }

    /// Whether the failure was a connect or query deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.cause,
            ScrapeCause::Connection(ConnectionError::Timeout { .. })
                | ScrapeCause::Query(QueryError::Timeout { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_cause() {
        let err = ScrapeError {
            target: "h1:30015".to_string(),
            phase: ScrapePhase::Scanning,
            cause: ScanError::Null { column: "TOTAL_SIZE" }.into(),
        };
        assert_eq!(err.kind(), ScrapeErrorKind::Scan);
        assert!(!err.is_timeout());
        assert_eq!(
            err.to_string(),
            "scrape of h1:30015 failed while scanning: column TOTAL_SIZE is NULL"
        );
    }

    #[test]
    fn timeouts_are_detected() {
        let err = ScrapeError {
            target: "h1".to_string(),
            phase: ScrapePhase::Querying,
            cause: QueryError::Timeout {
                timeout: Duration::from_secs(1),
            }
            .into(),
        };
        assert!(err.is_timeout());
        assert_eq!(err.kind(), ScrapeErrorKind::Query);
    }
}
