//! dbscrape-metrics — tagged measurements and their aggregation.
//!
//! Tag keys, measures and views are registered once on a
//! [`MetricsRegistry`] at process start. Scrapes then record
//! [`Measurement`]s under a [`MeasureContext`] (tag set + span context),
//! and the exposition layer renders snapshots as Prometheus text.
//!
//! # Architecture
//!
//! ```text
//! MetricsRegistry
//!   ├── register_tag_key() / register_views() ← once, at startup
//!   ├── tag_set()  → TagSet (registered keys only)
//!   ├── record()   ← called per scrape
//!   └── snapshot() → Vec<ViewData>
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod error;
pub mod measure;
pub mod prometheus;
pub mod registry;
pub mod tags;
pub mod view;

pub use error::{MetricsError, MetricsResult, TagError};
pub use measure::{Measure, MeasureKind, MeasureValue, Measurement};
pub use prometheus::render_prometheus;
pub use registry::{MeasureContext, MetricsRegistry, Registration, ViewData, ViewRow};
pub use tags::{TagKey, TagSet, TagSetBuilder};
pub use view::{Aggregation, AggregationData, View};
