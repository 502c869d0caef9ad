//! The scrape orchestrator.
//!
//! One [`ScrapeCollector::run`] call drives a full cycle for one target:
//!
//! ```text
//! scrape
//!  ├── sql_open_db_conn                      (open, bounded by open_timeout)
//!  ├── sql_query_<family>                    (child of the open span)
//!  │     └── sql_rows_scan                   (full cursor, policy-selected record)
//!  │           └── measure_value_set         (tag context + record)
//!  └── sql_close_db_conn                     (always, once per open)
//! ```
//!
//! Query, scan, tag and record run under a single `query_timeout`
//! deadline; the close is bounded by `close_timeout`. Every failure is
//! returned as a [`ScrapeError`]; the connection is released before
//! `run` returns on every path.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{Instrument, info, warn};

use dbscrape_metrics::{
    Aggregation, Measure, MeasureContext, MeasureValue, MetricsError, MetricsRegistry,
    MetricsResult, TagKey, View,
};
use dbscrape_trace::{TraceId, TraceSpan, Tracer};

use crate::connection::{ConnectionManager, ManagedConnection, QueryCursor};
use crate::driver::{Connection, Driver};
use crate::error::{QueryError, ScrapeCause, ScrapeError};
use crate::family::MetricFamily;
use crate::mapper::{EmptyResultPolicy, RowPolicy, RowSelector};
use crate::phase::{PhaseTracker, ScrapePhase};
use crate::tagging::TagContextBuilder;
use crate::target::Target;

/// Per-scrape behaviour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrapeConfig {
    pub open_timeout: Duration,
    pub query_timeout: Duration,
    /// Bound on releasing the connection; on expiry it is dropped unclosed.
    pub close_timeout: Duration,
    pub row_policy: RowPolicy,
    pub empty_result: EmptyResultPolicy,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            row_policy: RowPolicy::Latest,
            empty_result: EmptyResultPolicy::Skip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeOutcome {
    /// A record was selected and its measurements recorded.
    Recorded,
    /// The cursor was empty and nothing was recorded.
    Empty,
}

impl ScrapeOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recorded => "recorded",
            Self::Empty => "empty",
        }
    }
}

/// Result of a successful scrape.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeReport {
    pub target: String,
    pub family: String,
    pub outcome: ScrapeOutcome,
    pub rows_scanned: usize,
    /// Tag set the measurements were recorded under.
    pub tags: Vec<(String, String)>,
    pub measurements: Vec<(String, MeasureValue)>,
    #[serde(serialize_with = "dbscrape_trace::serialize_trace_id")]
    pub trace_id: TraceId,
    pub duration: Duration,
    pub phases: Vec<ScrapePhase>,
}

#[derive(Debug)]
struct Collected {
    outcome: ScrapeOutcome,
    rows_scanned: usize,
    tags: Vec<(String, String)>,
    measurements: Vec<(String, MeasureValue)>,
}

/// Scrape latency and count per family and outcome.
#[derive(Debug, Clone)]
struct SelfMetrics {
    duration: Measure,
    family: TagKey,
    outcome: TagKey,
}

impl SelfMetrics {
    fn register(registry: &MetricsRegistry) -> MetricsResult<Self> {
        let family = registry.register_tag_key("family")?;
        let outcome = registry.register_tag_key("outcome")?;
        let duration = Measure::float64(
            "dbscrape/scrape_duration",
            "Duration of one scrape.",
            "ms",
        );
        let keys = vec![family.clone(), outcome.clone()];
        registry.register_views(&[
            View::new(
                "dbscrape/scrape_duration_ms",
                "Duration of the most recent scrape.",
                duration.clone(),
                keys.clone(),
                Aggregation::LastValue,
            ),
            View::new(
                "dbscrape/scrape_count",
                "Number of scrapes.",
                duration.clone(),
                keys,
                Aggregation::Count,
            ),
        ])?;
        Ok(Self {
            duration,
            family,
            outcome,
        })
    }

    fn record(
        &self,
        registry: &MetricsRegistry,
        span: &TraceSpan,
        family: &str,
        outcome: &str,
        elapsed: Duration,
    ) {
        let millis = elapsed.as_secs_f64() * 1000.0;
        let result = registry
            .tag_set([(&self.family, family), (&self.outcome, outcome)])
            .map_err(MetricsError::from)
            .and_then(|tags| {
                let ctx = MeasureContext::new(tags, span.context());
                registry.record(&ctx, &[self.duration.m(millis)])
            });
        if let Err(e) = result {
            warn!(family, error = %e, "failed to record scrape metrics");
        }
    }
}

/// Drives scrapes of one driver's targets into a shared registry.
#[derive(Debug)]
pub struct ScrapeCollector<D: Driver> {
    connections: ConnectionManager<D>,
    registry: MetricsRegistry,
    tagger: TagContextBuilder,
    tracer: Tracer,
    config: ScrapeConfig,
    self_metrics: SelfMetrics,
}

impl<D: Driver> ScrapeCollector<D> {
    /// Registers the collector's own views; families register theirs
    /// separately.
    pub fn new(
        driver: D,
        registry: MetricsRegistry,
        tracer: Tracer,
        config: ScrapeConfig,
    ) -> MetricsResult<Self> {
        let self_metrics = SelfMetrics::register(&registry)?;
        Ok(Self {
            connections: ConnectionManager::new(driver, config.open_timeout, config.close_timeout),
            tagger: TagContextBuilder::new(registry.clone()),
            registry,
            tracer,
            config,
            self_metrics,
        })
    }

    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Scrape `target` once for `family`.
    pub async fn run<F: MetricFamily>(
        &self,
        target: &Target,
        family: &F,
    ) -> Result<ScrapeReport, ScrapeError> {
        let started = Instant::now();
        let mut root = self.tracer.root("scrape");
        root.set_attribute("db.target", target);
        root.set_attribute("scrape.family", family.name());
        let trace_id = root.trace_id();

        let mut phases = PhaseTracker::new();
        let result = self
            .scrape(target, family, &root, &mut phases)
            .instrument(root.tracing_span().clone())
            .await;
        let elapsed = started.elapsed();

        match result {
            Ok(collected) => {
                let outcome = collected.outcome;
                info!(
                    %target,
                    family = family.name(),
                    outcome = outcome.as_str(),
                    rows = collected.rows_scanned,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "scrape complete"
                );
                self.self_metrics
                    .record(&self.registry, &root, family.name(), outcome.as_str(), elapsed);
                root.set_attribute("scrape.outcome", outcome.as_str());
                root.end();
                Ok(ScrapeReport {
                    target: target.to_string(),
                    family: family.name().to_string(),
                    outcome,
                    rows_scanned: collected.rows_scanned,
                    tags: collected.tags,
                    measurements: collected.measurements,
                    trace_id,
                    duration: elapsed,
                    phases: phases.into_history(),
                })
            }
            Err(e) => {
                warn!(
                    %target,
                    family = family.name(),
                    kind = %e.kind(),
                    error = %e,
                    "scrape failed"
                );
                self.self_metrics
                    .record(&self.registry, &root, family.name(), "error", elapsed);
                root.set_error(&e);
                root.end();
                Err(e)
            }
        }
    }

    async fn scrape<F: MetricFamily>(
        &self,
        target: &Target,
        family: &F,
        root: &TraceSpan,
        phases: &mut PhaseTracker,
    ) -> Result<Collected, ScrapeError> {
        phases.advance(ScrapePhase::Connecting);
        let mut conn = match self.connections.open(target, root).await {
            Ok(conn) => conn,
            Err(e) => {
                phases.advance(ScrapePhase::Failed);
                return Err(ScrapeError {
                    target: target.to_string(),
                    phase: ScrapePhase::Connecting,
                    cause: e.into(),
                });
            }
        };

        let timeout = self.config.query_timeout;
        let collected = match tokio::time::timeout(timeout, self.collect(&mut conn, family, phases))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout { timeout }.into()),
        };
        let failed_in = phases.current();

        self.close(&mut conn, root).await;

        match collected {
            Ok(collected) => {
                phases.advance(ScrapePhase::Closed);
                Ok(collected)
            }
            Err(cause) => {
                phases.advance(ScrapePhase::Failed);
                Err(ScrapeError {
                    target: target.to_string(),
                    phase: failed_in,
                    cause,
                })
            }
        }
    }

    async fn collect<C: Connection, F: MetricFamily>(
        &self,
        conn: &mut ManagedConnection<C>,
        family: &F,
        phases: &mut PhaseTracker,
    ) -> Result<Collected, ScrapeCause> {
        phases.advance(ScrapePhase::Querying);
        let mut cursor = conn.query(family.statement(), family.name()).await?;

        phases.advance(ScrapePhase::Scanning);
        let mut scan_span = cursor.span().child("sql_rows_scan");
        let scanned = scan_rows(&mut cursor, family, self.config.row_policy)
            .instrument(scan_span.tracing_span().clone())
            .await;
        let (rows_scanned, record) = match scanned {
            Ok(selector) => (selector.seen(), selector.finish()),
            Err(cause) => {
                scan_span.set_error(&cause);
                scan_span.end();
                cursor.fail(&cause);
                cursor.finish();
                return Err(cause);
            }
        };
        scan_span.set_attribute("rows", rows_scanned);

        let Some(record) = record else {
            scan_span.end();
            return match self.config.empty_result {
                EmptyResultPolicy::Skip => {
                    cursor.finish();
                    Ok(Collected {
                        outcome: ScrapeOutcome::Empty,
                        rows_scanned: 0,
                        tags: Vec::new(),
                        measurements: Vec::new(),
                    })
                }
                EmptyResultPolicy::Fail => {
                    cursor.fail(ScrapeCause::EmptyResult);
                    cursor.finish();
                    Err(ScrapeCause::EmptyResult)
                }
            };
        };

        let mut set_span = scan_span.child("measure_value_set");
        let recorded = self.record(family, &record, &set_span, phases);
        match &recorded {
            Ok(collected) => set_span.set_attribute("measurements", collected.measurements.len()),
            Err(cause) => {
                set_span.set_error(cause);
                cursor.fail(cause);
            }
        }
        set_span.end();
        scan_span.end();
        cursor.finish();

        recorded.map(|mut collected| {
            collected.rows_scanned = rows_scanned;
            collected
        })
    }

    fn record<F: MetricFamily>(
        &self,
        family: &F,
        record: &F::Record,
        span: &TraceSpan,
        phases: &mut PhaseTracker,
    ) -> Result<Collected, ScrapeCause> {
        phases.advance(ScrapePhase::Tagging);
        let tags = family.tags(record);
        let ctx = self.tagger.build(&tags, span)?;

        phases.advance(ScrapePhase::Recording);
        let measurements = family.measurements(record);
        self.registry.record(&ctx, &measurements)?;

        Ok(Collected {
            outcome: ScrapeOutcome::Recorded,
            rows_scanned: 0,
            tags: tags
                .into_iter()
                .map(|(key, value)| (key.name().to_string(), value))
                .collect(),
            measurements: measurements
                .iter()
                .map(|m| (m.measure().name().to_string(), m.value()))
                .collect(),
        })
    }

    async fn close<C: Connection>(&self, conn: &mut ManagedConnection<C>, root: &TraceSpan) {
        let mut span = root.child("sql_close_db_conn");
        if let Err(e) = conn.close().instrument(span.tracing_span().clone()).await {
            warn!(db.target = conn.target(), error = %e, "failed to close connection");
            span.set_error(&e);
        }
        span.end();
    }
}

async fn scan_rows<'c, C, F>(
    cursor: &mut QueryCursor<'c, C>,
    family: &F,
    policy: RowPolicy,
) -> Result<RowSelector<F::Record>, ScrapeCause>
where
    C: Connection + 'c,
    F: MetricFamily,
{
    let mut selector = RowSelector::new(policy);
    while let Some(row) = cursor.next_row().await {
        let record = family.scan(&row?)?;
        selector.accept(record)?;
    }
    Ok(selector)
}
