//! Binds record tags to a trace context.

use dbscrape_metrics::{MeasureContext, MetricsRegistry, TagError, TagKey};
use dbscrape_trace::TraceSpan;

/// Builds the immutable [`MeasureContext`] measurements are recorded
/// under: the record's tag set plus the lineage of the recording span.
#[derive(Debug, Clone)]
pub struct TagContextBuilder {
    registry: MetricsRegistry,
}

impl TagContextBuilder {
    pub fn new(registry: MetricsRegistry) -> Self {
        Self { registry }
    }

    /// Fails if a key is not registered or a value is not encodable.
    pub fn build(
        &self,
        tags: &[(TagKey, String)],
        span: &TraceSpan,
    ) -> Result<MeasureContext, TagError> {
        let set = self
            .registry
            .tag_set(tags.iter().map(|(key, value)| (key, value.as_str())))?;
        Ok(MeasureContext::new(set, span.context()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbscrape_trace::{SdkTracerProvider, Tracer};

    fn tracer() -> Tracer {
        Tracer::new(SdkTracerProvider::builder().build())
    }

    #[test]
    fn context_carries_tags_and_span() {
        let registry = MetricsRegistry::new();
        let host = registry.register_tag_key("host").unwrap();
        let builder = TagContextBuilder::new(registry);
        let span = tracer().root("measure_value_set");

        let ctx = builder.build(&[(host, "h1".to_string())], &span).unwrap();
        assert_eq!(ctx.tags.get_by_name("host"), Some("h1"));
        assert_eq!(ctx.span, Some(span.context()));
    }

    #[test]
    fn unregistered_key_fails() {
        let builder = TagContextBuilder::new(MetricsRegistry::new());
        let key = TagKey::new("host").unwrap();
        let span = tracer().root("measure_value_set");

        let err = builder.build(&[(key, "h1".to_string())], &span).unwrap_err();
        assert_eq!(err, TagError::Unregistered("host".to_string()));
    }

    #[test]
    fn unprintable_value_fails() {
        let registry = MetricsRegistry::new();
        let path = registry.register_tag_key("path").unwrap();
        let builder = TagContextBuilder::new(registry);
        let span = tracer().root("measure_value_set");

        let err = builder
            .build(&[(path, "/data\n".to_string())], &span)
            .unwrap_err();
        assert!(matches!(err, TagError::InvalidValue { .. }));
    }
}
