//! Span handles.
//!
//! A [`TraceSpan`] is opened from a [`Tracer`] (root) or from another span
//! (child). It ends exactly once: explicitly via [`TraceSpan::end`], or
//! implicitly when dropped. The SDK hands finished spans of sampled
//! traces to the provider's span processors.

use std::borrow::Cow;
use std::fmt;

use opentelemetry::trace::{
    SpanContext, Status, TraceContextExt, TraceId, Tracer as _, TracerProvider as _,
};
use opentelemetry::{Context, Key, KeyValue};
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};

const INSTRUMENTATION_SCOPE: &str = "dbscrape";

/// Wrap a root sampling policy so children follow their parent's
/// decision and only root spans consult `root`.
pub fn parent_based(root: Sampler) -> Sampler {
    Sampler::ParentBased(Box::new(root))
}

/// Process-wide span factory over an SDK tracer provider. Cheap to clone.
#[derive(Clone)]
pub struct Tracer {
    provider: SdkTracerProvider,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl Tracer {
    /// Sampling and span processors are taken from `provider`; build it
    /// with [`parent_based`] so children inherit the root's decision.
    pub fn new(provider: SdkTracerProvider) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &SdkTracerProvider {
        &self.provider
    }

    /// Open a root span in a new trace. The sampler decides here.
    pub fn root(&self, name: impl Into<Cow<'static, str>>) -> TraceSpan {
        TraceSpan::start(&self.provider, name.into(), &Context::new(), None)
    }
}

/// An open unit of timed work.
pub struct TraceSpan {
    provider: SdkTracerProvider,
    name: Cow<'static, str>,
    cx: Context,
    span: tracing::Span,
    failed: bool,
}

impl fmt::Debug for TraceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceSpan")
            .field("name", &self.name)
            .field("context", &self.context())
            .finish_non_exhaustive()
    }
}

impl TraceSpan {
    fn start(
        provider: &SdkTracerProvider,
        name: Cow<'static, str>,
        parent: &Context,
        mirror_parent: Option<&tracing::Span>,
    ) -> Self {
        let otel = provider
            .tracer(INSTRUMENTATION_SCOPE)
            .start_with_context(name.clone(), parent);
        let cx = parent.with_span(otel);

        let ids = cx.span().span_context().clone();
        let span = tracing::info_span!(
            parent: mirror_parent.and_then(tracing::Span::id),
            "span",
            otel.name = %name,
            trace_id = %ids.trace_id(),
            span_id = %ids.span_id(),
        );

        Self {
            provider: provider.clone(),
            name,
            cx,
            span,
            failed: false,
        }
    }

    /// Open a child span. The child may outlive `self`; lineage is kept
    /// in the child's own context.
    pub fn child(&self, name: impl Into<Cow<'static, str>>) -> TraceSpan {
        TraceSpan::start(&self.provider, name.into(), &self.cx, Some(&self.span))
    }

    /// A cloneable parent handle that stays usable after this span ends.
    pub fn handle(&self) -> SpanRef {
        SpanRef {
            provider: self.provider.clone(),
            cx: self.cx.clone(),
            span: self.span.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> SpanContext {
        self.cx.span().span_context().clone()
    }

    pub fn trace_id(&self) -> TraceId {
        self.cx.span().span_context().trace_id()
    }

    /// The explicit OpenTelemetry context whose active span is this one.
    pub fn otel_context(&self) -> &Context {
        &self.cx
    }

    /// The `tracing` span mirroring this span, for `Instrument`.
    pub fn tracing_span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn set_attribute(&mut self, key: impl Into<Key>, value: impl fmt::Display) {
        self.cx
            .span()
            .set_attribute(KeyValue::new(key, value.to_string()));
    }

    /// Mark the span as failed. The first error is kept.
    pub fn set_error(&mut self, error: impl fmt::Display) {
        if self.failed {
            return;
        }
        self.failed = true;
        self.cx.span().set_status(Status::error(error.to_string()));
    }

    /// End the span now. Dropping the handle has the same effect.
    pub fn end(self) {}
}

impl Drop for TraceSpan {
    fn drop(&mut self) {
        self.cx.span().end();
    }
}

/// Parent handle of a (possibly finished) span.
#[derive(Clone)]
pub struct SpanRef {
    provider: SdkTracerProvider,
    cx: Context,
    span: tracing::Span,
}

impl fmt::Debug for SpanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanRef")
            .field("context", &self.context())
            .finish()
    }
}

impl SpanRef {
    pub fn context(&self) -> SpanContext {
        self.cx.span().span_context().clone()
    }

    pub fn otel_context(&self) -> &Context {
        &self.cx
    }

    pub fn tracing_span(&self) -> &tracing::Span {
        &self.span
    }

    /// Open a child span under this handle.
    pub fn child(&self, name: impl Into<Cow<'static, str>>) -> TraceSpan {
        TraceSpan::start(&self.provider, name.into(), &self.cx, Some(&self.span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::RecentSpans;
    use opentelemetry::trace::SpanId;
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SpanData};

    fn tracer_with_recent(sampler: Sampler) -> (Tracer, RecentSpans) {
        let recent = RecentSpans::new(16);
        let provider = SdkTracerProvider::builder()
            .with_sampler(parent_based(sampler))
            .with_span_processor(recent.clone())
            .build();
        (Tracer::new(provider), recent)
    }

    fn named<'a>(spans: &'a [SpanData], name: &str) -> &'a SpanData {
        spans.iter().find(|s| s.name == name).unwrap()
    }

    #[test]
    fn child_links_to_parent() {
        let (tracer, recent) = tracer_with_recent(Sampler::AlwaysOn);
        let root = tracer.root("root");
        let child = root.child("child");
        let root_ctx = root.context();
        child.end();
        root.end();

        let spans = recent.spans();
        assert_eq!(spans.len(), 2);
        let child = named(&spans, "child");
        let root = named(&spans, "root");
        assert_eq!(child.parent_span_id, root_ctx.span_id());
        assert_eq!(child.span_context.trace_id(), root_ctx.trace_id());
        assert_eq!(root.parent_span_id, SpanId::INVALID);
        assert!(child.start_time >= root.start_time && child.end_time <= root.end_time);
    }

    #[test]
    fn handle_parents_children_after_end() {
        let (tracer, recent) = tracer_with_recent(Sampler::AlwaysOn);
        let open = tracer.root("open");
        let handle = open.handle();
        open.end();
        handle.child("query").end();

        let spans = recent.spans();
        assert_eq!(spans[1].name, "query");
        assert_eq!(spans[1].parent_span_id, handle.context().span_id());
    }

    #[test]
    fn drop_ends_span_once() {
        let (tracer, recent) = tracer_with_recent(Sampler::AlwaysOn);
        let handle = {
            let span = tracer.root("dropped");
            span.handle()
        };
        assert_eq!(recent.spans().len(), 1);
        drop(handle);
        assert_eq!(recent.spans().len(), 1);
    }

    #[test]
    fn unsampled_spans_are_not_exported() {
        let (tracer, recent) = tracer_with_recent(Sampler::AlwaysOff);
        let root = tracer.root("root");
        let child = root.child("child");
        assert!(!child.context().is_sampled());
        assert_ne!(root.trace_id(), TraceId::INVALID);
        assert_eq!(child.context().trace_id(), root.trace_id());
        child.end();
        root.end();
        assert!(recent.spans().is_empty());
    }

    #[test]
    fn ratio_sampler_decides_at_root() {
        let (never, _) = tracer_with_recent(Sampler::TraceIdRatioBased(0.0));
        assert!(!never.root("root").child("child").context().is_sampled());

        let (always, _) = tracer_with_recent(Sampler::TraceIdRatioBased(1.0));
        assert!(always.root("root").child("child").context().is_sampled());
    }

    #[test]
    fn first_error_and_attributes_are_kept() {
        let (tracer, recent) = tracer_with_recent(Sampler::AlwaysOn);
        let mut span = tracer.root("failing");
        span.set_attribute("db.statement", "SELECT 1");
        span.set_error("boom");
        span.set_error("later");
        span.end();

        let spans = recent.spans();
        assert_eq!(spans[0].status, Status::error("boom"));
        assert!(
            spans[0]
                .attributes
                .iter()
                .any(|kv| kv.key.as_str() == "db.statement" && kv.value.as_str() == "SELECT 1")
        );
    }

    #[test]
    fn spans_reach_sdk_exporters() {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_sampler(parent_based(Sampler::AlwaysOn))
            .with_simple_exporter(exporter.clone())
            .build();
        let tracer = Tracer::new(provider);

        let root = tracer.root("scrape");
        root.child("step").end();
        root.end();

        let names: Vec<_> = exporter
            .get_finished_spans()
            .unwrap()
            .into_iter()
            .map(|s| s.name.to_string())
            .collect();
        assert_eq!(names, vec!["step", "scrape"]);
    }
}
