//! dbscrape-api — HTTP surface of the scrape daemon.
//!
//! Each `/metrics` request triggers exactly one scrape of the requested
//! target and answers with the Prometheus text of the whole registry.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Landing page |
//! | GET | `/metrics?target=<addr>` | Scrape `addr`, then Prometheus exposition |
//! | GET | `/debug/tracez` | Recent finished spans, newest first |
//! | GET | `/healthz` | Liveness |

pub mod handlers;
pub mod request_metrics;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use dbscrape_collector::{DisksFamily, Driver, ScrapeCollector, Target};
use dbscrape_metrics::{MetricsRegistry, MetricsResult};
use dbscrape_trace::RecentSpans;

pub use request_metrics::RequestMetrics;

/// Credentials applied to every target named in a request.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    pub database: Option<String>,
}

/// Shared state for API handlers.
pub struct ApiState<D: Driver> {
    pub collector: Arc<ScrapeCollector<D>>,
    pub family: Arc<DisksFamily>,
    pub spans: RecentSpans,
    pub namespace: Arc<str>,
    pub credentials: Arc<Credentials>,
    pub requests: RequestMetrics,
}

// Derived Clone would require `D: Clone`.
impl<D: Driver> Clone for ApiState<D> {
    fn clone(&self) -> Self {
        Self {
            collector: self.collector.clone(),
            family: self.family.clone(),
            spans: self.spans.clone(),
            namespace: self.namespace.clone(),
            credentials: self.credentials.clone(),
            requests: self.requests.clone(),
        }
    }
}

impl<D: Driver> ApiState<D> {
    /// Registers the HTTP server views on the collector's registry.
    pub fn new(
        collector: Arc<ScrapeCollector<D>>,
        family: Arc<DisksFamily>,
        spans: RecentSpans,
        namespace: &str,
        credentials: Credentials,
    ) -> MetricsResult<Self> {
        let requests = RequestMetrics::register(collector.registry())?;
        Ok(Self {
            collector,
            family,
            spans,
            namespace: Arc::from(namespace),
            credentials: Arc::new(credentials),
            requests,
        })
    }

    pub fn registry(&self) -> &MetricsRegistry {
        self.collector.registry()
    }

    /// Target for `address` with the configured credentials.
    pub fn target(&self, address: &str) -> Target {
        Target {
            address: address.to_string(),
            user: self.credentials.user.clone(),
            password: self.credentials.password.clone(),
            database: self.credentials.database.clone(),
        }
    }
}

/// Build the complete router.
pub fn build_router<D: Driver>(state: ApiState<D>) -> Router {
    let requests = state.requests.clone();
    Router::new()
        .route("/", get(handlers::index))
        .route("/metrics", get(handlers::metrics::<D>))
        .route("/debug/tracez", get(handlers::tracez::<D>))
        .route("/healthz", get(handlers::healthz))
        .route_layer(axum::middleware::from_fn_with_state(
            requests,
            request_metrics::track,
        ))
        .with_state(state)
}
