//! Span processors for finished spans.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::UNIX_EPOCH;

use opentelemetry::Context;
use opentelemetry::trace::{SpanId, Status, TraceId};
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::trace::{Span, SpanData, SpanProcessor};
use serde::Serialize;
use tracing::debug;

/// Keeps the most recent sampled spans in a bounded ring.
///
/// Clones share the ring: register one clone with the provider and read
/// through another.
#[derive(Debug, Clone)]
pub struct RecentSpans {
    inner: Arc<Ring>,
}

#[derive(Debug)]
struct Ring {
    capacity: usize,
    spans: Mutex<VecDeque<SpanData>>,
}

impl RecentSpans {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Ring {
                capacity,
                spans: Mutex::new(VecDeque::with_capacity(capacity)),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<SpanData>> {
        match self.inner.spans.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Finished spans in end order, oldest first.
    pub fn spans(&self) -> Vec<SpanData> {
        self.lock().iter().cloned().collect()
    }

    /// Finished spans of one trace, oldest first.
    pub fn trace(&self, trace_id: TraceId) -> Vec<SpanData> {
        self.lock()
            .iter()
            .filter(|s| s.span_context.trace_id() == trace_id)
            .cloned()
            .collect()
    }

    /// Serializable summaries, newest first.
    pub fn records(&self) -> Vec<SpanRecord> {
        self.lock().iter().rev().map(SpanRecord::from).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl SpanProcessor for RecentSpans {
    fn on_start(&self, _span: &mut Span, _cx: &Context) {}

    fn on_end(&self, span: SpanData) {
        if !span.span_context.is_sampled() {
            return;
        }
        let mut spans = self.lock();
        if spans.len() == self.inner.capacity {
            spans.pop_front();
        }
        spans.push_back(span);
    }

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown(&self) -> OTelSdkResult {
        Ok(())
    }
}

/// Emits one `debug!` event per finished, sampled span.
#[derive(Debug, Default)]
pub struct SpanLogger;

impl SpanProcessor for SpanLogger {
    fn on_start(&self, _span: &mut Span, _cx: &Context) {}

    fn on_end(&self, span: SpanData) {
        if !span.span_context.is_sampled() {
            return;
        }
        let record = SpanRecord::from(&span);
        let error = match &record.status {
            SpanStatus::Ok => None,
            SpanStatus::Error(msg) => Some(msg.as_str()),
        };
        debug!(
            name = %record.name,
            trace_id = %record.trace_id,
            span_id = %record.span_id,
            parent_id = ?record.parent_span_id,
            duration_us = record.duration_us,
            error,
            "span finished"
        );
    }

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown(&self) -> OTelSdkResult {
        Ok(())
    }
}

/// Outcome of a finished span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", content = "message", rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    Error(String),
}

/// JSON view of a finished span for `/debug/tracez`.
#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    pub name: String,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    /// Start as microseconds since the Unix epoch.
    pub start_us: u64,
    pub duration_us: u64,
    pub attributes: Vec<(String, String)>,
    pub status: SpanStatus,
}

impl From<&SpanData> for SpanRecord {
    fn from(span: &SpanData) -> Self {
        let parent_span_id =
            (span.parent_span_id != SpanId::INVALID).then(|| span.parent_span_id.to_string());
        let status = match &span.status {
            Status::Error { description } => SpanStatus::Error(description.to_string()),
            Status::Unset | Status::Ok => SpanStatus::Ok,
        };
        Self {
            name: span.name.to_string(),
            trace_id: span.span_context.trace_id().to_string(),
            span_id: span.span_context.span_id().to_string(),
            parent_span_id,
            start_us: span
                .start_time
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_micros() as u64,
            duration_us: span
                .end_time
                .duration_since(span.start_time)
                .unwrap_or_default()
                .as_micros() as u64,
            attributes: span
                .attributes
                .iter()
                .map(|kv| (kv.key.as_str().to_string(), kv.value.as_str().into_owned()))
                .collect(),
            status,
        }
    }
}
