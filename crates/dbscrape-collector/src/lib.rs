//! dbscrape-collector — on-demand scrapes of database diagnostic views.
//!
//! A scrape opens one traced connection to a [`Target`], runs the
//! family's fixed statement, scans the cursor into typed records, and
//! records the selected record's measurements into the shared
//! [`dbscrape_metrics::MetricsRegistry`].
//!
//! # Architecture
//!
//! ```text
//! ScrapeCollector::run(target, family)
//!   ├── ConnectionManager::open()     → ManagedConnection   (Driver seam)
//!   ├── ManagedConnection::query()    → QueryCursor          (RowCursor)
//!   ├── RowMapper::scan() per row     → RowSelector (Latest | Single)
//!   ├── TagContextBuilder::build()    → MeasureContext
//!   ├── MetricsRegistry::record()
//!   └── ManagedConnection::close()    (every path)
//!
//! Drivers
//!   └── SqlxDriver (sqlx::AnyConnection: postgres, mysql, sqlite)
//! ```

pub mod collector;
pub mod connection;
pub mod driver;
pub mod error;
pub mod family;
pub mod mapper;
pub mod phase;
pub mod sqlx_driver;
pub mod tagging;
pub mod target;

pub use collector::{ScrapeCollector, ScrapeConfig, ScrapeOutcome, ScrapeReport};
pub use connection::{ConnectionManager, ManagedConnection, QueryCursor};
pub use driver::{Connection, Driver, FieldValue, RawRow, RowCursor};
pub use error::{
    CloseError, ConnectionError, DriverError, QueryError, ScanError, ScrapeCause, ScrapeError,
    ScrapeErrorKind,
};
pub use family::{DISKS_STATEMENT, DiskRecord, DisksFamily, MetricFamily};
pub use mapper::{Column, ColumnType, EmptyResultPolicy, RowMapper, RowPolicy, RowSelector, SchemaRow};
pub use phase::ScrapePhase;
pub use sqlx_driver::SqlxDriver;
pub use tagging::TagContextBuilder;
pub use target::Target;
