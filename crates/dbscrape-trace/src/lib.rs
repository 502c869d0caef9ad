//! dbscrape-trace — OpenTelemetry spans for the scrape pipeline.
//!
//! Spans are explicit handles: every pipeline stage receives its parent
//! span and opens a child for the next stage. The parent relationship
//! travels in an [`opentelemetry::Context`] owned by the handle; nothing
//! is read from or attached to the thread's current context. Each handle
//! also carries a `tracing` span with the same ids, used to instrument
//! the stage's futures so log lines can be correlated with traces.
//!
//! # Architecture
//!
//! ```text
//! SdkTracerProvider (ParentBased sampler + span processors)
//!   └── Tracer::root("scrape") → TraceSpan
//!         └── child("sql_open_db_conn") → TraceSpan
//!               └── ...
//!
//! TraceSpan::end / Drop → SpanData → SpanProcessor::on_end
//!   ├── RecentSpans  (bounded ring, /debug/tracez)
//!   └── SpanLogger   (debug! event per span)
//! ```

pub mod processor;
pub mod span;

pub use opentelemetry::trace::{SpanContext, SpanId, Status, TraceId};
pub use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider, SpanData};

pub use processor::{RecentSpans, SpanLogger, SpanRecord, SpanStatus};
pub use span::{SpanRef, TraceSpan, Tracer, parent_based};

/// Serialize a [`TraceId`] as 32 lowercase hex digits.
pub fn serialize_trace_id<S: serde::Serializer>(id: &TraceId, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(id)
}

/// Like [`serialize_trace_id`], for optional ids.
pub fn serialize_opt_trace_id<S: serde::Serializer>(
    id: &Option<TraceId>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match id {
        Some(id) => s.serialize_some(&id.to_string()),
        None => s.serialize_none(),
    }
}
