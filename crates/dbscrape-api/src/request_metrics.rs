//! Per-route request counting.

use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};

use dbscrape_metrics::{
    Aggregation, Measure, MeasureContext, MetricsError, MetricsRegistry, MetricsResult, TagKey,
    View,
};

pub const REQUEST_COUNT_VIEW: &str = "http/server/request_count";

/// HTTP server views, recorded by [`track`].
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    registry: MetricsRegistry,
    latency: Measure,
    route: TagKey,
    status: TagKey,
}

impl RequestMetrics {
    pub fn register(registry: &MetricsRegistry) -> MetricsResult<Self> {
        let route = registry.register_tag_key("route")?;
        let status = registry.register_tag_key("status")?;
        let latency = Measure::float64("http/server/latency", "Request latency.", "ms");
        registry.register_views(&[View::new(
            REQUEST_COUNT_VIEW,
            "Count of HTTP requests by route and status.",
            latency.clone(),
            vec![route.clone(), status.clone()],
            Aggregation::Count,
        )])?;
        Ok(Self {
            registry: registry.clone(),
            latency,
            route,
            status,
        })
    }

    fn record(&self, route: &str, status: u16, millis: f64) -> MetricsResult<()> {
        let status = status.to_string();
        let tags = self
            .registry
            .tag_set([(&self.route, route), (&self.status, status.as_str())])
            .map_err(MetricsError::from)?;
        self.registry
            .record(&MeasureContext::untraced(tags), &[self.latency.m(millis)])?;
        Ok(())
    }
}

/// Middleware counting every routed request.
pub async fn track(State(metrics): State<RequestMetrics>, request: Request, next: Next) -> Response {
    let route = match request.extensions().get::<MatchedPath>() {
        Some(path) => path.as_str().to_string(),
        None => request.uri().path().to_string(),
    };
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let millis = started.elapsed().as_secs_f64() * 1000.0;
    debug!(%route, status, elapsed_ms = millis, "request served");
    if let Err(e) = metrics.record(&route, status, millis) {
        warn!(%route, error = %e, "failed to record request metrics");
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbscrape_metrics::AggregationData;

    #[test]
    fn counts_by_route_and_status() {
        let registry = MetricsRegistry::new();
        let metrics = RequestMetrics::register(&registry).unwrap();
        metrics.record("/metrics", 200, 1.5).unwrap();
        metrics.record("/metrics", 200, 2.5).unwrap();
        metrics.record("/metrics", 400, 0.1).unwrap();

        let rows = registry.view_data(REQUEST_COUNT_VIEW).unwrap().rows;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tags[1].1, "200");
        assert_eq!(rows[0].data, AggregationData::Count(2));
        assert_eq!(rows[1].data, AggregationData::Count(1));
    }

    #[test]
    fn register_is_idempotent() {
        let registry = MetricsRegistry::new();
        RequestMetrics::register(&registry).unwrap();
        RequestMetrics::register(&registry).unwrap();
        assert_eq!(registry.view_names(), vec![REQUEST_COUNT_VIEW.to_string()]);
    }
}
