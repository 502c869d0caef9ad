//! Route handlers.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;
use tracing::debug;

use dbscrape_collector::Driver;
use dbscrape_metrics::render_prometheus;

use crate::ApiState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub const MISSING_TARGET: &str = "'target' parameter must be specified";

const INDEX_HTML: &str = r#"<html>
<head><title>dbscrape</title></head>
<body>
<h1>dbscrape</h1>
<p><a href="/metrics">Metrics</a> (requires <code>?target=host:port</code>)</p>
<p><a href="/debug/tracez">Recent traces</a></p>
</body>
</html>
"#;

#[derive(Debug, Deserialize)]
pub struct MetricsParams {
    pub target: Option<String>,
}

/// GET /
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

/// GET /metrics?target=<addr>
pub async fn metrics<D: Driver>(
    State(state): State<ApiState<D>>,
    Query(params): Query<MetricsParams>,
) -> Response {
    let Some(address) = params.target.filter(|t| !t.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, MISSING_TARGET).into_response();
    };

    let target = state.target(&address);
    if let Err(e) = state.collector.run(&target, state.family.as_ref()).await {
        let status = if e.is_timeout() {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::BAD_GATEWAY
        };
        return (status, e.to_string()).into_response();
    }

    let body = render_prometheus(&state.namespace, &state.registry().snapshot());
    debug!(%target, bytes = body.len(), "metrics rendered");
    (
        StatusCode::OK,
        [("content-type", PROMETHEUS_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

/// GET /debug/tracez
pub async fn tracez<D: Driver>(State(state): State<ApiState<D>>) -> impl IntoResponse {
    Json(state.spans.records())
}
